use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, new_id, now_iso, require_actor, require_branch, require_user,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request, Role};
use crate::passwords;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct EnrollmentRow {
    branch_enrollment_no: i64,
    student_name: String,
    status: String,
    branch_code: String,
}

fn load_enrollment(
    conn: &Connection,
    enrollment_id: &str,
    branch_id: &str,
) -> Result<EnrollmentRow, HandlerErr> {
    conn.query_row(
        "SELECT e.branch_enrollment_no, e.student_name, e.status, b.branch_code
         FROM enrollments e JOIN branches b ON b.id = e.branch_id
         WHERE e.id = ? AND e.branch_id = ?",
        (enrollment_id, branch_id),
        |r| {
            Ok(EnrollmentRow {
                branch_enrollment_no: r.get(0)?,
                student_name: r.get(1)?,
                status: r.get(2)?,
                branch_code: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("enrollment not found"))
}

fn insert_user(
    tx: &Connection,
    branch_id: &str,
    username: &str,
    role: &str,
) -> Result<(String, String), HandlerErr> {
    let temp_password = passwords::generate_temp_password();
    let user_id = new_id();
    tx.execute(
        "INSERT INTO users(id, branch_id, username, password_hash, role, require_password_change, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (
            &user_id,
            branch_id,
            username,
            &passwords::hash_password(&temp_password),
            role,
            &now_iso(),
        ),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::conflict(format!("username {} already exists", username))
        }
        other => HandlerErr::db_update(other),
    })?;
    Ok((user_id, temp_password))
}

fn accounts_create_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Registrar])?;
    let branch_id = require_branch(&actor)?;
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let enrollment = load_enrollment(conn, &enrollment_id, &branch_id)?;
    if enrollment.status != "approved" {
        return Err(HandlerErr::conflict(format!(
            "enrollment is {}, only approved enrollments get accounts",
            enrollment.status
        )));
    }
    let existing: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM student_accounts WHERE enrollment_id = ?",
            [&enrollment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if existing.is_some() {
        return Err(HandlerErr::conflict(
            "student account already exists for this enrollment",
        ));
    }

    let username = format!(
        "{}_{:04}",
        enrollment.branch_code, enrollment.branch_enrollment_no
    );
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let (user_id, temp_password) = insert_user(&tx, &branch_id, &username, "student")?;
    tx.execute(
        "INSERT INTO student_accounts(id, enrollment_id, user_id, created_at)
         VALUES(?, ?, ?, ?)",
        (&new_id(), &enrollment_id, &user_id, &now_iso()),
    )
    .map_err(HandlerErr::db_update)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "userId": user_id,
        "username": username,
        "studentName": enrollment.student_name,
        "temporaryPassword": temp_password,
        "requirePasswordChange": true
    }))
}

fn accounts_create_parent(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Registrar])?;
    let branch_id = require_branch(&actor)?;
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let relationship = get_opt_str(params, "relationship").unwrap_or_else(|| "Guardian".into());
    let enrollment = load_enrollment(conn, &enrollment_id, &branch_id)?;
    if enrollment.status != "approved" {
        return Err(HandlerErr::conflict(format!(
            "enrollment is {}, only approved enrollments get accounts",
            enrollment.status
        )));
    }

    let parent_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM users WHERE branch_id = ? AND role = 'parent'",
            [&branch_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    let username = format!("{}_Parent{}", enrollment.branch_code, parent_count + 1);

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let (user_id, temp_password) = insert_user(&tx, &branch_id, &username, "parent")?;
    tx.execute(
        "INSERT INTO parent_student(parent_user_id, enrollment_id, relationship, created_at)
         VALUES(?, ?, ?, ?)",
        (&user_id, &enrollment_id, &relationship, &now_iso()),
    )
    .map_err(HandlerErr::db_update)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "userId": user_id,
        "username": username,
        "linkedStudent": enrollment.student_name,
        "relationship": relationship,
        "temporaryPassword": temp_password,
        "requirePasswordChange": true
    }))
}

const STAFF_ROLES: &[&str] = &["registrar", "cashier", "librarian", "teacher"];

fn accounts_create_staff(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::BranchAdmin])?;
    let branch_id = require_branch(&actor)?;
    let role = get_required_str(params, "role")?;
    if !STAFF_ROLES.contains(&role.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "role must be one of {}, got {}",
            STAFF_ROLES.join("/"),
            role
        )));
    }
    let base = get_required_str(params, "baseUsername")?;
    let username = format!("{}_{}", base.to_lowercase(), role);

    let (user_id, temp_password) = insert_user(conn, &branch_id, &username, &role)?;
    Ok(json!({
        "userId": user_id,
        "username": username,
        "role": role,
        "temporaryPassword": temp_password,
        "requirePasswordChange": true
    }))
}

fn accounts_link_child(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Parent])?;
    let parent_user_id = require_user(&actor)?;
    let branch_id = require_branch(&actor)?;
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let relationship = get_opt_str(params, "relationship").unwrap_or_else(|| "Guardian".into());

    let enrollment = load_enrollment(conn, &enrollment_id, &branch_id)?;
    let already: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM parent_student WHERE parent_user_id = ? AND enrollment_id = ?",
            (&parent_user_id, &enrollment_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if already.is_some() {
        return Err(HandlerErr::conflict("child already linked"));
    }
    conn.execute(
        "INSERT INTO parent_student(parent_user_id, enrollment_id, relationship, created_at)
         VALUES(?, ?, ?, ?)",
        (&parent_user_id, &enrollment_id, &relationship, &now_iso()),
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({
        "enrollmentId": enrollment_id,
        "studentName": enrollment.student_name,
        "relationship": relationship
    }))
}

fn handle_gated(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "accounts.createStudent" => Some(handle_gated(state, req, accounts_create_student)),
        "accounts.createParent" => Some(handle_gated(state, req, accounts_create_parent)),
        "accounts.createStaff" => Some(handle_gated(state, req, accounts_create_staff)),
        "accounts.linkChild" => Some(handle_gated(state, req, accounts_link_child)),
        _ => None,
    }
}
