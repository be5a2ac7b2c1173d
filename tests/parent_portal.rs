
use serde_json::json;
use test_support::{actor, request_err, request_ok, spawn_sidecar, super_admin, temp_dir};

#[test]
fn parents_reserve_for_linked_children_only() {
    let workspace = temp_dir("liceo-parent-portal");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let branch = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "branches.create",
        json!({ "actor": super_admin(), "branchName": "West", "branchCode": "WEST" }),
    );
    let branch_id = branch["branchId"].as_str().expect("branchId").to_string();
    let admin = actor(
        "branch_admin",
        branch["admin"]["userId"].as_str().expect("admin"),
        &branch_id,
    );

    let mut submit = |id: &str, name: &str| {
        let e = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "enrollments.submit",
            json!({ "branchId": &branch_id, "studentName": name, "gradeLevel": "Grade 2" }),
        );
        e["enrollmentId"].as_str().expect("id").to_string()
    };
    let own_child = submit("3", "Dela Cruz, Ella");
    let other_child = submit("4", "Torres, Fe");

    let registrar_user = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "accounts.createStaff",
        json!({ "actor": &admin, "role": "registrar", "baseUsername": "west" }),
    );
    let registrar = actor(
        "registrar",
        registrar_user["userId"].as_str().expect("registrar"),
        &branch_id,
    );
    for (id, eid) in [("6", &own_child), ("7", &other_child)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "enrollments.decide",
            json!({ "actor": &registrar, "enrollmentId": eid, "action": "approve" }),
        );
    }

    let parent_user = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "accounts.createParent",
        json!({ "actor": &registrar, "enrollmentId": &own_child, "relationship": "Father" }),
    );
    assert_eq!(parent_user["username"].as_str(), Some("WEST_Parent1"));
    let parent = actor(
        "parent",
        parent_user["userId"].as_str().expect("parent"),
        &branch_id,
    );

    let item = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "inventory.add",
        json!({
            "actor": &admin,
            "category": "UNIFORM",
            "itemName": "Pre-Elementary Girls Set",
            "price": 380.0,
            "stock": 6
        }),
    );
    let item_id = item["itemId"].as_str().expect("itemId").to_string();

    // Reserving against someone else's child is refused.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "reservations.create",
        json!({
            "actor": &parent,
            "enrollmentId": &other_child,
            "lines": [{ "itemId": &item_id, "qty": 1 }]
        }),
    );
    assert_eq!(code, "unauthorized");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "reservations.create",
        json!({
            "actor": &parent,
            "enrollmentId": &own_child,
            "lines": [{ "itemId": &item_id, "qty": 2, "size": "S" }]
        }),
    );
    let reservation_id = created["reservationId"].as_str().expect("id").to_string();
    assert_eq!(created["total"].as_f64(), Some(760.0));

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "reservations.get",
        json!({ "actor": &parent, "reservationId": &reservation_id }),
    );
    assert_eq!(detail["status"], "RESERVED");
    assert_eq!(detail["gradeLevel"], "Grade 2");

    let mine = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "reservations.listForStudent",
        json!({ "actor": &parent }),
    );
    let rows = mine["reservations"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["studentName"], "Dela Cruz, Ella");

    // A second linked family sees nothing of the first one's reservations.
    let second_parent_user = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "accounts.createParent",
        json!({ "actor": &registrar, "enrollmentId": &other_child }),
    );
    assert_eq!(second_parent_user["username"].as_str(), Some("WEST_Parent2"));
    let second_parent = actor(
        "parent",
        second_parent_user["userId"].as_str().expect("parent"),
        &branch_id,
    );
    let theirs = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "reservations.listForStudent",
        json!({ "actor": &second_parent }),
    );
    assert_eq!(theirs["reservations"].as_array().map(|a| a.len()), Some(0));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "16",
        "reservations.get",
        json!({ "actor": &second_parent, "reservationId": &reservation_id }),
    );
    assert_eq!(code, "unauthorized");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
