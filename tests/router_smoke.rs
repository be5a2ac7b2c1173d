
use serde_json::json;
use test_support::{request, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn health_unknown_methods_and_workspace_guard() {
    let workspace = temp_dir("liceo-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["version"].is_string());
    assert!(health["workspacePath"].is_null());

    // Every data method requires a selected workspace.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "enrollments.track",
        json!({ "enrollmentId": "nope" }),
    );
    assert_eq!(code, "no_workspace");

    let resp = request(&mut stdin, &mut reader, "3", "nosuch.method", json!({}));
    assert_eq!(
        resp["error"]["code"].as_str(),
        Some("not_implemented")
    );

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(selected["workspacePath"].is_string());
    let health = request_ok(&mut stdin, &mut reader, "5", "health", json!({}));
    assert!(health["workspacePath"].is_string());

    // Reopening the same workspace is idempotent.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
