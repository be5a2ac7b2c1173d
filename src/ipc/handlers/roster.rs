use crate::grades;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, require_actor, require_branch, require_user, HandlerErr,
};
use crate::ipc::types::{AppState, Request, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn roster_assign_grade(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Teacher])?;
    let user_id = require_user(&actor)?;
    let raw = get_required_str(params, "gradeLevel")?;
    let grade = grades::normalize_grade_level(&raw)
        .filter(|g| grades::GRADE_LEVELS.contains(&g.as_str()))
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown grade level: {}", raw)))?;

    let current: Option<Option<String>> = conn
        .query_row(
            "SELECT grade_level FROM users WHERE id = ? AND role = 'teacher'",
            [&user_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    match current {
        None => return Err(HandlerErr::not_found("teacher account not found")),
        Some(Some(existing)) => {
            return Err(HandlerErr::conflict(format!(
                "grade {} is already assigned to this account",
                existing
            )))
        }
        Some(None) => {}
    }
    conn.execute(
        "UPDATE users SET grade_level = ? WHERE id = ?",
        (&grade, &user_id),
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({ "gradeLevel": grade }))
}

fn roster_class_overview(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Teacher])?;
    let user_id = require_user(&actor)?;
    let branch_id = require_branch(&actor)?;

    let grade = match get_opt_str(params, "gradeLevel") {
        Some(raw) => grades::normalize_grade_level(&raw)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown grade level: {}", raw)))?,
        None => conn
            .query_row(
                "SELECT grade_level FROM users WHERE id = ?",
                [&user_id],
                |r| r.get::<_, Option<String>>(0),
            )
            .optional()
            .map_err(HandlerErr::db_query)?
            .flatten()
            .ok_or_else(|| HandlerErr::bad_params("no grade assigned to this account"))?,
    };
    // Stored grades may read "Grade 7" or just "7".
    let (full, short) = grades::grade_spellings(&grade);

    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.branch_enrollment_no, e.student_name,
                    (SELECT b.status FROM billing b WHERE b.enrollment_id = e.id),
                    (SELECT r.status FROM reservations r
                     WHERE r.enrollment_id = e.id
                     ORDER BY r.created_at DESC LIMIT 1)
             FROM enrollments e
             WHERE e.branch_id = ? AND e.status = 'approved'
               AND (e.grade_level = ? OR e.grade_level = ?)
             ORDER BY e.student_name",
        )
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map((&branch_id, &full, &short), |r| {
            let bill_status: Option<String> = r.get(3)?;
            let billing = match bill_status.as_deref() {
                Some("paid") => "CLEARED",
                Some(_) => "PENDING",
                None => "NO_BILL",
            };
            Ok(json!({
                "enrollmentId": r.get::<_, String>(0)?,
                "branchEnrollmentNo": r.get::<_, i64>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "billingStatus": billing,
                "latestReservationStatus": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let total = students.len();
    let cleared = students
        .iter()
        .filter(|s| s["billingStatus"] == "CLEARED")
        .count();
    let with_reservation = students
        .iter()
        .filter(|s| !s["latestReservationStatus"].is_null())
        .count();

    Ok(json!({
        "gradeLevel": grade,
        "students": students,
        "stats": {
            "totalStudents": total,
            "billingCleared": cleared,
            "withReservations": with_reservation,
        }
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
        "roster.assignGrade" => Some(handle_gated(state, req, roster_assign_grade)),
        "roster.classOverview" => Some(handle_gated(state, req, roster_class_overview)),
        _ => None,
    }
}
