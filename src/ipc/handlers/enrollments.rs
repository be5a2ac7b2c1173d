use crate::grades;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    ensure_branch_active, get_opt_str, get_required_str, new_id, now_iso, require_actor,
    require_branch, HandlerErr,
};
use crate::ipc::types::{AppState, Request, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn enrollments_submit(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let branch_id = get_required_str(params, "branchId")?;
    let student_name = get_required_str(params, "studentName")?;
    let grade_raw = get_required_str(params, "gradeLevel")?;
    let grade_level = grades::normalize_grade_level(&grade_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown grade level: {}", grade_raw)))?;
    ensure_branch_active(conn, &branch_id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    // Per-branch running number, dense from 1.
    let next_no: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(branch_enrollment_no), 0) + 1
             FROM enrollments WHERE branch_id = ?",
            [&branch_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    let id = new_id();
    tx.execute(
        "INSERT INTO enrollments(
             id, branch_id, branch_enrollment_no, student_name, grade_level,
             gender, dob, address, contact_number, guardian_name, guardian_contact,
             previous_school, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
        rusqlite::params![
            id,
            branch_id,
            next_no,
            student_name,
            grade_level,
            get_opt_str(params, "gender"),
            get_opt_str(params, "dob"),
            get_opt_str(params, "address"),
            get_opt_str(params, "contactNumber"),
            get_opt_str(params, "guardianName"),
            get_opt_str(params, "guardianContact"),
            get_opt_str(params, "previousSchool"),
            now_iso(),
        ],
    )
    .map_err(HandlerErr::db_update)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "enrollmentId": id,
        "branchEnrollmentNo": next_no,
        "status": "pending"
    }))
}

fn enrollments_decide(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Registrar])?;
    let branch_id = require_branch(&actor)?;
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let action = get_required_str(params, "action")?;
    let new_status = match action.as_str() {
        "approve" => "approved",
        "reject" => "rejected",
        other => {
            return Err(HandlerErr::bad_params(format!(
                "action must be approve or reject, got {}",
                other
            )))
        }
    };

    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM enrollments WHERE id = ? AND branch_id = ?",
            (&enrollment_id, &branch_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    match status.as_deref() {
        None => return Err(HandlerErr::not_found("enrollment not found")),
        Some("pending") => {}
        Some(other) => {
            return Err(HandlerErr::conflict(format!(
                "enrollment already {}",
                other
            )))
        }
    }
    conn.execute(
        "UPDATE enrollments SET status = ? WHERE id = ?",
        (new_status, &enrollment_id),
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({ "enrollmentId": enrollment_id, "status": new_status }))
}

fn enrollments_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Registrar, Role::BranchAdmin])?;
    let branch_id = require_branch(&actor)?;
    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.branch_enrollment_no, e.student_name, e.grade_level,
                    e.status, e.created_at,
                    EXISTS(SELECT 1 FROM student_accounts sa WHERE sa.enrollment_id = e.id),
                    EXISTS(SELECT 1 FROM parent_student ps WHERE ps.enrollment_id = e.id)
             FROM enrollments e
             WHERE e.branch_id = ?
             ORDER BY e.branch_enrollment_no",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&branch_id], |r| {
            Ok(json!({
                "enrollmentId": r.get::<_, String>(0)?,
                "branchEnrollmentNo": r.get::<_, i64>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "gradeLevel": r.get::<_, Option<String>>(3)?,
                "status": r.get::<_, String>(4)?,
                "createdAt": r.get::<_, String>(5)?,
                "hasStudentAccount": r.get::<_, i64>(6)? != 0,
                "hasParentLink": r.get::<_, i64>(7)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "enrollments": rows }))
}

fn enrollments_track(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let row = conn
        .query_row(
            "SELECT e.branch_enrollment_no, e.student_name, e.grade_level, e.status,
                    e.created_at, b.branch_name
             FROM enrollments e JOIN branches b ON b.id = e.branch_id
             WHERE e.id = ?",
            [&enrollment_id],
            |r| {
                Ok(json!({
                    "enrollmentId": enrollment_id,
                    "branchEnrollmentNo": r.get::<_, i64>(0)?,
                    "studentName": r.get::<_, String>(1)?,
                    "gradeLevel": r.get::<_, Option<String>>(2)?,
                    "status": r.get::<_, String>(3)?,
                    "submittedAt": r.get::<_, String>(4)?,
                    "branchName": r.get::<_, String>(5)?,
                }))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    row.ok_or_else(|| HandlerErr::not_found("enrollment not found"))
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
        "enrollments.submit" => Some(handle_gated(state, req, enrollments_submit)),
        "enrollments.decide" => Some(handle_gated(state, req, enrollments_decide)),
        "enrollments.list" => Some(handle_gated(state, req, enrollments_list)),
        "enrollments.track" => Some(handle_gated(state, req, enrollments_track)),
        _ => None,
    }
}
