use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    ensure_branch_active, get_opt_str, get_required_qty, get_required_str, new_id, now_iso,
    require_actor, require_branch, require_user, HandlerErr,
};
use crate::ipc::types::{AppState, Request, Role};
use crate::money;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn releases_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Librarian])?;
    let branch_id = require_branch(&actor)?;
    let librarian_id = require_user(&actor)?;
    ensure_branch_active(conn, &branch_id)?;
    let item_id = get_required_str(params, "itemId")?;
    let qty = get_required_qty(params, "qty")?;

    // The released-to student is either a tracked enrollment or a free-text name.
    let enrollment_id = get_opt_str(params, "enrollmentId");
    let student_name = match &enrollment_id {
        Some(eid) => conn
            .query_row(
                "SELECT student_name FROM enrollments WHERE id = ? AND branch_id = ?",
                (eid, &branch_id),
                |r| r.get::<_, String>(0),
            )
            .optional()
            .map_err(HandlerErr::db_query)?
            .ok_or_else(|| HandlerErr::not_found("enrollment not found"))?,
        None => get_required_str(params, "studentName")?,
    };

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let item = tx
        .query_row(
            "SELECT item_name, category, price_cents, stock_total, reserved_qty
             FROM inventory_items WHERE id = ? AND branch_id = ?",
            (&item_id, &branch_id),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((item_name, category, price_cents, stock_total, reserved_qty)) = item else {
        return Err(HandlerErr::not_found("item not found"));
    };
    if category != "BOOK" {
        return Err(HandlerErr::bad_params("only BOOK items are released"));
    }
    let available = stock_total - reserved_qty;
    if qty > available {
        return Err(HandlerErr {
            code: "insufficient_stock",
            message: format!(
                "{}: requested {}, only {} available",
                item_name, qty, available
            ),
            details: Some(json!({
                "itemId": item_id,
                "requested": qty,
                "available": available,
            })),
        });
    }

    let release_id = new_id();
    tx.execute(
        "INSERT INTO book_releases(id, branch_id, enrollment_id, student_name, released_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &release_id,
            &branch_id,
            &enrollment_id,
            &student_name,
            &librarian_id,
            &now_iso(),
        ),
    )
    .map_err(HandlerErr::db_update)?;
    tx.execute(
        "INSERT INTO book_release_items(id, release_id, item_id, qty, unit_price_cents)
         VALUES(?, ?, ?, ?, ?)",
        (&new_id(), &release_id, &item_id, qty, price_cents),
    )
    .map_err(HandlerErr::db_update)?;
    tx.execute(
        "UPDATE inventory_items SET stock_total = stock_total - ? WHERE id = ?",
        (qty, &item_id),
    )
    .map_err(HandlerErr::db_update)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "releaseId": release_id,
        "itemName": item_name,
        "qty": qty,
        "studentName": student_name,
        "stockTotal": stock_total - qty,
    }))
}

fn releases_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Librarian])?;
    let branch_id = require_branch(&actor)?;
    let mut stmt = conn
        .prepare(
            "SELECT br.id, br.student_name, e.grade_level, br.created_at,
                    i.item_name, i.size_label, bri.qty, bri.unit_price_cents
             FROM book_releases br
             JOIN book_release_items bri ON bri.release_id = br.id
             JOIN inventory_items i ON i.id = bri.item_id
             LEFT JOIN enrollments e ON e.id = br.enrollment_id
             WHERE br.branch_id = ?
             ORDER BY br.created_at DESC
             LIMIT 50",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&branch_id], |r| {
            let name: String = r.get(4)?;
            let publisher: Option<String> = r.get(5)?;
            let display = match publisher {
                Some(p) if !p.is_empty() => format!("{} ({})", name, p),
                _ => name,
            };
            Ok(json!({
                "releaseId": r.get::<_, String>(0)?,
                "studentName": r.get::<_, String>(1)?,
                "gradeLevel": r.get::<_, Option<String>>(2)?,
                "releasedAt": r.get::<_, String>(3)?,
                "book": display,
                "qty": r.get::<_, i64>(6)?,
                "unitPrice": money::cents_to_pesos(r.get::<_, i64>(7)?),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "releases": rows }))
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
        "releases.record" => Some(handle_gated(state, req, releases_record)),
        "releases.list" => Some(handle_gated(state, req, releases_list)),
        _ => None,
    }
}
