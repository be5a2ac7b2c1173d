
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{actor, request_err, request_ok, spawn_sidecar, super_admin, temp_dir};

struct Fixture {
    branch_id: String,
    enrollment_id: String,
    admin: serde_json::Value,
    cashier: serde_json::Value,
}

fn setup(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let branch = request_ok(
        stdin,
        reader,
        "s2",
        "branches.create",
        json!({ "actor": super_admin(), "branchName": "East", "branchCode": "EAST" }),
    );
    let branch_id = branch["branchId"].as_str().expect("branchId").to_string();
    let admin = actor(
        "branch_admin",
        branch["admin"]["userId"].as_str().expect("admin"),
        &branch_id,
    );

    let enrollment = request_ok(
        stdin,
        reader,
        "s3",
        "enrollments.submit",
        json!({
            "branchId": &branch_id,
            "studentName": "Cruz, Dina",
            "gradeLevel": "Grade 5"
        }),
    );
    let enrollment_id = enrollment["enrollmentId"].as_str().expect("id").to_string();

    let registrar_user = request_ok(
        stdin,
        reader,
        "s4",
        "accounts.createStaff",
        json!({ "actor": &admin, "role": "registrar", "baseUsername": "east" }),
    );
    let registrar = actor(
        "registrar",
        registrar_user["userId"].as_str().expect("registrar"),
        &branch_id,
    );
    let _ = request_ok(
        stdin,
        reader,
        "s5",
        "enrollments.decide",
        json!({ "actor": &registrar, "enrollmentId": &enrollment_id, "action": "approve" }),
    );
    let cashier_user = request_ok(
        stdin,
        reader,
        "s6",
        "accounts.createStaff",
        json!({ "actor": &admin, "role": "cashier", "baseUsername": "east" }),
    );
    let cashier = actor(
        "cashier",
        cashier_user["userId"].as_str().expect("cashier"),
        &branch_id,
    );

    Fixture {
        branch_id,
        enrollment_id,
        admin,
        cashier,
    }
}

#[test]
fn book_release_deducts_stock_and_lists_history() {
    let workspace = temp_dir("liceo-releases");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let librarian_user = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "accounts.createStaff",
        json!({ "actor": &fx.admin, "role": "librarian", "baseUsername": "east" }),
    );
    let librarian = actor(
        "librarian",
        librarian_user["userId"].as_str().expect("librarian"),
        &fx.branch_id,
    );

    let book = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "inventory.add",
        json!({
            "actor": &librarian,
            "category": "BOOK",
            "itemName": "Filipino 5 Reader",
            "gradeLevel": "Grade 5",
            "sizeLabel": "Vibal",
            "price": 280.0,
            "stock": 3
        }),
    );
    let book_id = book["itemId"].as_str().expect("itemId").to_string();

    let released = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "releases.record",
        json!({
            "actor": &librarian,
            "itemId": &book_id,
            "qty": 2,
            "enrollmentId": &fx.enrollment_id
        }),
    );
    assert_eq!(released["studentName"], "Cruz, Dina");
    assert_eq!(released["stockTotal"].as_i64(), Some(1));

    // Cannot hand out more than what is on the shelf.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "r4",
        "releases.record",
        json!({
            "actor": &librarian,
            "itemId": &book_id,
            "qty": 2,
            "studentName": "Walk-in"
        }),
    );
    assert_eq!(code, "insufficient_stock");

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "r5",
        "releases.list",
        json!({ "actor": &librarian }),
    );
    let rows = history["releases"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["book"], "Filipino 5 Reader (Vibal)");
    assert_eq!(rows[0]["gradeLevel"], "Grade 5");
    assert_eq!(rows[0]["qty"].as_i64(), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn teacher_grade_assignment_and_class_overview() {
    let workspace = temp_dir("liceo-roster");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let teacher_user = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "accounts.createStaff",
        json!({ "actor": &fx.admin, "role": "teacher", "baseUsername": "east" }),
    );
    let teacher = actor(
        "teacher",
        teacher_user["userId"].as_str().expect("teacher"),
        &fx.branch_id,
    );

    // No grade yet, so an overview without a grade parameter fails.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "t2",
        "roster.classOverview",
        json!({ "actor": &teacher }),
    );
    assert_eq!(code, "bad_params");

    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "t3",
        "roster.assignGrade",
        json!({ "actor": &teacher, "gradeLevel": "Grade 5" }),
    );
    assert_eq!(assigned["gradeLevel"], "Grade 5");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "t4",
        "roster.assignGrade",
        json!({ "actor": &teacher, "gradeLevel": "Grade 6" }),
    );
    assert_eq!(code, "conflict");

    // One approved Grade 5 student with no bill yet.
    let overview = request_ok(
        &mut stdin,
        &mut reader,
        "t5",
        "roster.classOverview",
        json!({ "actor": &teacher }),
    );
    let students = overview["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["studentName"], "Cruz, Dina");
    assert_eq!(students[0]["billingStatus"], "NO_BILL");
    assert_eq!(overview["stats"]["totalStudents"].as_i64(), Some(1));
    assert_eq!(overview["stats"]["billingCleared"].as_i64(), Some(0));

    let bill = request_ok(
        &mut stdin,
        &mut reader,
        "t6",
        "billing.create",
        json!({ "actor": &fx.cashier, "enrollmentId": &fx.enrollment_id, "tuition": 100.0 }),
    );
    let bill_id = bill["billId"].as_str().expect("billId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "t7",
        "billing.recordPayment",
        json!({ "actor": &fx.cashier, "billId": &bill_id, "amount": 100.0, "method": "cash" }),
    );

    let overview = request_ok(
        &mut stdin,
        &mut reader,
        "t8",
        "roster.classOverview",
        json!({ "actor": &teacher }),
    );
    let students = overview["students"].as_array().expect("students");
    assert_eq!(students[0]["billingStatus"], "CLEARED");
    assert_eq!(overview["stats"]["billingCleared"].as_i64(), Some(1));

    // A pending enrollment stays off the class list.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "t9",
        "enrollments.submit",
        json!({
            "branchId": &fx.branch_id,
            "studentName": "Lim, Greg",
            "gradeLevel": "Grade 5"
        }),
    );
    let overview = request_ok(
        &mut stdin,
        &mut reader,
        "t10",
        "roster.classOverview",
        json!({ "actor": &teacher }),
    );
    assert_eq!(overview["stats"]["totalStudents"].as_i64(), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
