
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{actor, request_err, request_ok, spawn_sidecar, super_admin, temp_dir};

fn setup_admin(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> serde_json::Value {
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
        json!({
            "actor": super_admin(),
            "branchName": "Hillside",
            "branchCode": "HILL",
            "location": "Hilltop"
        }),
    );
    actor(
        "branch_admin",
        branch["admin"]["userId"].as_str().expect("admin"),
        branch["branchId"].as_str().expect("branchId"),
    )
}

fn find_item<'a>(listing: &'a serde_json::Value, item_id: &str) -> &'a serde_json::Value {
    listing["items"]
        .as_array()
        .expect("items")
        .iter()
        .find(|i| i["itemId"] == item_id)
        .expect("item in listing")
}

#[test]
fn size_rows_drive_parent_totals() {
    let workspace = temp_dir("liceo-inventory-sizes");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, &workspace);

    let item = request_ok(
        &mut stdin,
        &mut reader,
        "i1",
        "inventory.add",
        json!({
            "actor": &admin,
            "category": "UNIFORM",
            "itemName": "JHS Boys Uniform Set",
            "price": 450.0,
            "stock": 7
        }),
    );
    let item_id = item["itemId"].as_str().expect("itemId").to_string();

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "i2",
        "inventory.createSizes",
        json!({ "actor": &admin, "itemId": &item_id }),
    );
    assert_eq!(created["sizes"].as_array().map(|a| a.len()), Some(6));

    // Size rows start empty and take over the parent counters.
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "i3",
        "inventory.list",
        json!({ "actor": &admin }),
    );
    let row = find_item(&listing, &item_id);
    assert_eq!(row["stockTotal"].as_i64(), Some(0));
    assert_eq!(row["sizes"].as_array().map(|a| a.len()), Some(6));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "i4",
        "inventory.createSizes",
        json!({ "actor": &admin, "itemId": &item_id }),
    );
    assert_eq!(code, "conflict");

    // Sized items restock through a size row.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "i5",
        "inventory.restock",
        json!({ "actor": &admin, "itemId": &item_id, "qty": 5 }),
    );
    assert_eq!(code, "bad_params");

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "i6",
        "inventory.restock",
        json!({ "actor": &admin, "itemId": &item_id, "qty": 5, "size": "M" }),
    );
    assert_eq!(after["stockTotal"].as_i64(), Some(5));
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "i7",
        "inventory.restock",
        json!({ "actor": &admin, "itemId": &item_id, "qty": 3, "size": "XL" }),
    );
    assert_eq!(after["stockTotal"].as_i64(), Some(8));

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "i8",
        "inventory.list",
        json!({ "actor": &admin }),
    );
    let row = find_item(&listing, &item_id);
    assert_eq!(row["stockTotal"].as_i64(), Some(8));
    let sizes = row["sizes"].as_array().expect("sizes");
    let m = sizes.iter().find(|s| s["sizeLabel"] == "M").expect("M row");
    assert_eq!(m["stockTotal"].as_i64(), Some(5));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "i9",
        "inventory.restock",
        json!({ "actor": &admin, "itemId": &item_id, "qty": 1, "size": "XXXL" }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn listing_filters_sorts_and_counts_stats() {
    let workspace = temp_dir("liceo-inventory-list");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, &workspace);

    let mut add = |id: &str, category: &str, name: &str, grade: Option<&str>, stock: i64| {
        let mut params = json!({
            "actor": &admin,
            "category": category,
            "itemName": name,
            "price": 100.0,
            "stock": stock
        });
        if let Some(g) = grade {
            params["gradeLevel"] = json!(g);
        }
        request_ok(&mut stdin, &mut reader, id, "inventory.add", params)
    };
    add("a1", "UNIFORM", "PE Uniform", None, 50);
    add("a2", "UNIFORM", "JHS Boys Uniform Set", None, 4);
    add("a3", "BOOK", "Science 7 Textbook", Some("Grade 7"), 0);
    add("a4", "BOOK", "Math 3 Workbook", Some("Grade 3"), 30);

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "inventory.list",
        json!({ "actor": &admin }),
    );
    let names: Vec<&str> = listing["items"]
        .as_array()
        .expect("items")
        .iter()
        .map(|i| i["itemName"].as_str().expect("name"))
        .collect();
    // Books before uniforms, grade order inside the category.
    assert_eq!(
        names,
        vec![
            "Math 3 Workbook",
            "Science 7 Textbook",
            "JHS Boys Uniform Set",
            "PE Uniform"
        ]
    );
    assert_eq!(listing["stats"]["itemCount"].as_i64(), Some(4));
    assert_eq!(listing["stats"]["totalStock"].as_i64(), Some(84));
    assert_eq!(listing["stats"]["lowStock"].as_i64(), Some(1));
    assert_eq!(listing["stats"]["outOfStock"].as_i64(), Some(1));

    let books = request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "inventory.list",
        json!({ "actor": &admin, "category": "BOOK" }),
    );
    assert_eq!(books["items"].as_array().map(|a| a.len()), Some(2));

    // Uniform sets match the grades they span, not a stored grade column.
    let grade8 = request_ok(
        &mut stdin,
        &mut reader,
        "l3",
        "inventory.list",
        json!({ "actor": &admin, "category": "UNIFORM", "grade": "Grade 8" }),
    );
    let names: Vec<&str> = grade8["items"]
        .as_array()
        .expect("items")
        .iter()
        .map(|i| i["itemName"].as_str().expect("name"))
        .collect();
    assert!(names.contains(&"JHS Boys Uniform Set"));
    assert!(names.contains(&"PE Uniform"));

    let searched = request_ok(
        &mut stdin,
        &mut reader,
        "l4",
        "inventory.list",
        json!({ "actor": &admin, "search": "science" }),
    );
    assert_eq!(searched["items"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn librarians_touch_books_only() {
    let workspace = temp_dir("liceo-inventory-librarian");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, &workspace);
    let branch_id = admin["branchId"].as_str().expect("branch").to_string();

    let librarian_user = request_ok(
        &mut stdin,
        &mut reader,
        "x1",
        "accounts.createStaff",
        json!({ "actor": &admin, "role": "librarian", "baseUsername": "hill" }),
    );
    let librarian = actor(
        "librarian",
        librarian_user["userId"].as_str().expect("librarian"),
        &branch_id,
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "x2",
        "inventory.add",
        json!({
            "actor": &librarian,
            "category": "UNIFORM",
            "itemName": "PE Uniform",
            "price": 300.0
        }),
    );
    assert_eq!(code, "unauthorized");

    let book = request_ok(
        &mut stdin,
        &mut reader,
        "x3",
        "inventory.add",
        json!({
            "actor": &librarian,
            "category": "BOOK",
            "itemName": "English 5 Reader",
            "gradeLevel": "Grade 5",
            "price": 250.0,
            "stock": 12
        }),
    );
    let book_id = book["itemId"].as_str().expect("itemId").to_string();
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "x4",
        "inventory.restock",
        json!({ "actor": &librarian, "itemId": &book_id, "qty": 6 }),
    );
    assert_eq!(after["stockTotal"].as_i64(), Some(18));

    let uniform = request_ok(
        &mut stdin,
        &mut reader,
        "x5",
        "inventory.add",
        json!({
            "actor": &admin,
            "category": "UNIFORM",
            "itemName": "PE Uniform",
            "price": 300.0,
            "stock": 5
        }),
    );
    let uniform_id = uniform["itemId"].as_str().expect("itemId").to_string();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "x6",
        "inventory.restock",
        json!({ "actor": &librarian, "itemId": &uniform_id, "qty": 1 }),
    );
    assert_eq!(code, "unauthorized");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
