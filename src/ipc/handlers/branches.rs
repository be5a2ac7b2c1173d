use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, new_id, now_iso, require_actor, HandlerErr,
};
use crate::ipc::types::{AppState, Request, Role};
use crate::passwords;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn admin_username(branch_name: &str) -> String {
    let base: String = branch_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    format!("{}_admin", base)
}

fn branches_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_actor(params, &[Role::SuperAdmin])?;
    let branch_name = get_required_str(params, "branchName")?;
    let branch_code = get_required_str(params, "branchCode")?.to_uppercase();
    let location = get_opt_str(params, "location");

    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM branches WHERE branch_name = ? OR branch_code = ?",
            (&branch_name, &branch_code),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if taken.is_some() {
        return Err(HandlerErr::conflict("branch name or code already exists"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let branch_id = new_id();
    let now = now_iso();
    tx.execute(
        "INSERT INTO branches(id, branch_code, branch_name, location, is_active, created_at)
         VALUES(?, ?, ?, ?, 1, ?)",
        (&branch_id, &branch_code, &branch_name, &location, &now),
    )
    .map_err(HandlerErr::db_update)?;

    let username = admin_username(&branch_name);
    let temp_password = passwords::generate_temp_password();
    let user_id = new_id();
    tx.execute(
        "INSERT INTO users(id, branch_id, username, password_hash, role, require_password_change, created_at)
         VALUES(?, ?, ?, ?, 'branch_admin', 1, ?)",
        (
            &user_id,
            &branch_id,
            &username,
            &passwords::hash_password(&temp_password),
            &now,
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
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "branchId": branch_id,
        "branchCode": branch_code,
        "branchName": branch_name,
        "admin": {
            "userId": user_id,
            "username": username,
            "temporaryPassword": temp_password,
            "requirePasswordChange": true
        }
    }))
}

fn branches_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_actor(params, &[Role::SuperAdmin])?;
    let mut stmt = conn
        .prepare(
            "SELECT b.id, b.branch_code, b.branch_name, b.location, b.is_active, b.created_at,
                    (SELECT username FROM users u
                     WHERE u.branch_id = b.id AND u.role = 'branch_admin'
                     ORDER BY u.created_at LIMIT 1)
             FROM branches b
             ORDER BY b.branch_name",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "branchId": r.get::<_, String>(0)?,
                "branchCode": r.get::<_, String>(1)?,
                "branchName": r.get::<_, String>(2)?,
                "location": r.get::<_, Option<String>>(3)?,
                "isActive": r.get::<_, i64>(4)? != 0,
                "createdAt": r.get::<_, String>(5)?,
                "adminUsername": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "branches": rows }))
}

fn branches_set_active(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_actor(params, &[Role::SuperAdmin])?;
    let branch_id = get_required_str(params, "branchId")?;
    let is_active = params
        .get("isActive")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("missing isActive"))?;
    let changed = conn
        .execute(
            "UPDATE branches SET is_active = ? WHERE id = ?",
            (is_active as i64, &branch_id),
        )
        .map_err(HandlerErr::db_update)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("branch not found"));
    }
    Ok(json!({ "branchId": branch_id, "isActive": is_active }))
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
        "branches.create" => Some(handle_gated(state, req, branches_create)),
        "branches.list" => Some(handle_gated(state, req, branches_list)),
        "branches.setActive" => Some(handle_gated(state, req, branches_set_active)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_username_lowercases_and_joins() {
        assert_eq!(admin_username("Main Campus"), "main_campus_admin");
        assert_eq!(admin_username("Annex"), "annex_admin");
    }
}
