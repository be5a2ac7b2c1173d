use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::ipc::error::err;
use crate::ipc::types::{Actor, Role};
use crate::money;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn db_query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn db_update(e: rusqlite::Error) -> Self {
        Self::new("db_update_failed", e.to_string())
    }

    pub fn db_tx(e: rusqlite::Error) -> Self {
        Self::new("db_tx_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Positive integer quantity.
pub fn get_required_qty(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    let qty = params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if qty <= 0 {
        return Err(HandlerErr::bad_params(format!(
            "{} must be greater than zero",
            key
        )));
    }
    Ok(qty)
}

/// Peso amount as centavos; missing key counts as zero.
pub fn get_amount_cents(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Ok(0);
    };
    if v.is_null() {
        return Ok(0);
    }
    let amount = v
        .as_f64()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key)))?;
    money::pesos_to_cents(amount)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-negative amount", key)))
}

/// Parse `params.actor` and check the role against the allow-list.
pub fn require_actor(
    params: &serde_json::Value,
    allowed: &[Role],
) -> Result<Actor, HandlerErr> {
    let actor = params
        .get("actor")
        .ok_or_else(|| HandlerErr::unauthorized("missing actor"))?;
    let role_str = actor
        .get("role")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::unauthorized("missing actor.role"))?;
    let role = Role::parse(role_str)
        .ok_or_else(|| HandlerErr::unauthorized(format!("unknown role: {}", role_str)))?;
    if !allowed.contains(&role) {
        return Err(HandlerErr::unauthorized(format!(
            "role {} may not call this method",
            role.as_str()
        )));
    }
    Ok(Actor {
        user_id: actor
            .get("userId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        role,
        branch_id: actor
            .get("branchId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    })
}

pub fn require_branch(actor: &Actor) -> Result<String, HandlerErr> {
    actor
        .branch_id
        .clone()
        .ok_or_else(|| HandlerErr::unauthorized("no branch assigned"))
}

pub fn require_user(actor: &Actor) -> Result<String, HandlerErr> {
    actor
        .user_id
        .clone()
        .ok_or_else(|| HandlerErr::unauthorized("missing actor.userId"))
}

/// Branch gate: deactivated branches refuse new enrollments, reservations,
/// bills and payments. A missing branch row fails as not_found instead.
pub fn ensure_branch_active(conn: &Connection, branch_id: &str) -> Result<(), HandlerErr> {
    let active: Option<i64> = conn
        .query_row(
            "SELECT is_active FROM branches WHERE id = ?",
            [branch_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    match active {
        None => Err(HandlerErr::not_found("branch not found")),
        Some(0) => Err(HandlerErr::new(
            "branch_inactive",
            "this branch is currently deactivated",
        )),
        Some(_) => Ok(()),
    }
}
