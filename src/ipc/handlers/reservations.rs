use crate::grades;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    ensure_branch_active, get_required_str, new_id, now_iso, require_actor, require_branch,
    require_user, HandlerErr,
};
use crate::ipc::types::{AppState, Request, Role};
use crate::money;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct ReservationHeader {
    id: String,
    branch_id: String,
    enrollment_id: Option<String>,
    student_grade_level: Option<String>,
    reserved_by_user_id: String,
    status: String,
    created_at: String,
    paid_at: Option<String>,
    claimed_at: Option<String>,
    cancelled_at: Option<String>,
}

struct LineRow {
    item_id: String,
    item_name: String,
    category: String,
    qty: i64,
    size_label: Option<String>,
    unit_price_cents: i64,
    line_total_cents: i64,
}

fn load_header(conn: &Connection, reservation_id: &str) -> Result<ReservationHeader, HandlerErr> {
    conn.query_row(
        "SELECT id, branch_id, enrollment_id, student_grade_level, reserved_by_user_id,
                status, created_at, paid_at, claimed_at, cancelled_at
         FROM reservations WHERE id = ?",
        [reservation_id],
        |r| {
            Ok(ReservationHeader {
                id: r.get(0)?,
                branch_id: r.get(1)?,
                enrollment_id: r.get(2)?,
                student_grade_level: r.get(3)?,
                reserved_by_user_id: r.get(4)?,
                status: r.get(5)?,
                created_at: r.get(6)?,
                paid_at: r.get(7)?,
                claimed_at: r.get(8)?,
                cancelled_at: r.get(9)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("reservation not found"))
}

fn load_lines(conn: &Connection, reservation_id: &str) -> Result<Vec<LineRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT ri.item_id, i.item_name, i.category, ri.qty, ri.size_label,
                    ri.unit_price_cents, ri.line_total_cents
             FROM reservation_items ri
             JOIN inventory_items i ON i.id = ri.item_id
             WHERE ri.reservation_id = ?",
        )
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([reservation_id], |r| {
        Ok(LineRow {
            item_id: r.get(0)?,
            item_name: r.get(1)?,
            category: r.get(2)?,
            qty: r.get(3)?,
            size_label: r.get(4)?,
            unit_price_cents: r.get(5)?,
            line_total_cents: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

/// Resolve the enrollment a reservation is made for. Students reserve for
/// themselves through their linked account; parents must name a linked child.
fn resolve_enrollment(
    conn: &Connection,
    params: &serde_json::Value,
    actor_role: Role,
    actor_user_id: &str,
    branch_id: &str,
) -> Result<(String, Option<String>), HandlerErr> {
    match actor_role {
        Role::Student => {
            let row = conn
                .query_row(
                    "SELECT e.id, e.grade_level
                     FROM student_accounts sa
                     JOIN enrollments e ON e.id = sa.enrollment_id
                     WHERE sa.user_id = ? AND e.branch_id = ?",
                    (actor_user_id, branch_id),
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?)),
                )
                .optional()
                .map_err(HandlerErr::db_query)?;
            row.ok_or_else(|| HandlerErr::not_found("no enrollment linked to this account"))
        }
        Role::Parent => {
            let enrollment_id = get_required_str(params, "enrollmentId")?;
            let row = conn
                .query_row(
                    "SELECT e.id, e.grade_level
                     FROM parent_student ps
                     JOIN enrollments e ON e.id = ps.enrollment_id
                     WHERE ps.parent_user_id = ? AND ps.enrollment_id = ? AND e.branch_id = ?",
                    (actor_user_id, &enrollment_id, branch_id),
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?)),
                )
                .optional()
                .map_err(HandlerErr::db_query)?;
            row.ok_or_else(|| HandlerErr::unauthorized("enrollment is not linked to this parent"))
        }
        _ => Err(HandlerErr::unauthorized("only students and parents reserve")),
    }
}

fn reservations_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Student, Role::Parent])?;
    let user_id = require_user(&actor)?;
    let branch_id = require_branch(&actor)?;
    ensure_branch_active(conn, &branch_id)?;
    let (enrollment_id, grade_level) =
        resolve_enrollment(conn, params, actor.role, &user_id, &branch_id)?;

    let lines = params
        .get("lines")
        .and_then(|v| v.as_array())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("missing lines"))?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let reservation_id = new_id();
    tx.execute(
        "INSERT INTO reservations(
             id, branch_id, enrollment_id, student_grade_level, reserved_by_user_id,
             status, created_at)
         VALUES(?, ?, ?, ?, ?, 'RESERVED', ?)",
        (
            &reservation_id,
            &branch_id,
            &enrollment_id,
            &grade_level,
            &user_id,
            &now_iso(),
        ),
    )
    .map_err(HandlerErr::db_update)?;

    let mut total_cents = 0i64;
    for line in lines {
        let item_id = line
            .get("itemId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("line missing itemId"))?;
        let qty = line
            .get("qty")
            .and_then(|v| v.as_i64())
            .filter(|q| *q > 0)
            .ok_or_else(|| HandlerErr::bad_params("line qty must be greater than zero"))?;

        let item = tx
            .query_row(
                "SELECT item_name, size_label, price_cents, stock_total, reserved_qty, is_active,
                        grade_level, is_common
                 FROM inventory_items WHERE id = ? AND branch_id = ?",
                (item_id, &branch_id),
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, Option<String>>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, i64>(3)?,
                        r.get::<_, i64>(4)?,
                        r.get::<_, i64>(5)? != 0,
                        r.get::<_, Option<String>>(6)?,
                        r.get::<_, i64>(7)? != 0,
                    ))
                },
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        let Some((
            item_name,
            item_size,
            price_cents,
            stock_total,
            reserved_qty,
            is_active,
            item_grade,
            is_common,
        )) = item
        else {
            return Err(HandlerErr::not_found(format!("item {} not found", item_id)));
        };
        if !is_active {
            return Err(HandlerErr::conflict(format!(
                "{} is not available for reservation",
                item_name
            )));
        }
        let visible = is_common
            || grades::item_visible_for_grade(
                &item_name,
                item_grade.as_deref(),
                grade_level.as_deref(),
            );
        if !visible {
            return Err(HandlerErr::conflict(format!(
                "{} is not offered for this grade level",
                item_name
            )));
        }
        let available = stock_total - reserved_qty;
        if qty > available {
            // Whole request fails; the open transaction rolls back on drop.
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

        let size = line
            .get("size")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or(item_size);
        let line_total = price_cents * qty;
        tx.execute(
            "UPDATE inventory_items SET reserved_qty = reserved_qty + ? WHERE id = ?",
            (qty, item_id),
        )
        .map_err(HandlerErr::db_update)?;
        tx.execute(
            "INSERT INTO reservation_items(
                 id, reservation_id, item_id, qty, size_label, unit_price_cents, line_total_cents)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                new_id(),
                reservation_id,
                item_id,
                qty,
                size,
                price_cents,
                line_total
            ],
        )
        .map_err(HandlerErr::db_update)?;
        total_cents += line_total;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "reservationId": reservation_id,
        "enrollmentId": enrollment_id,
        "status": "RESERVED",
        "total": money::cents_to_pesos(total_cents),
    }))
}

fn cashier_header(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<ReservationHeader, HandlerErr> {
    let actor = require_actor(params, &[Role::Cashier])?;
    let branch_id = require_branch(&actor)?;
    let reservation_id = get_required_str(params, "reservationId")?;
    let header = load_header(conn, &reservation_id)?;
    if header.branch_id != branch_id {
        return Err(HandlerErr::not_found("reservation not found"));
    }
    ensure_branch_active(conn, &branch_id)?;
    Ok(header)
}

fn reservations_cancel(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let header = cashier_header(conn, params)?;
    if header.status != "RESERVED" {
        return Err(HandlerErr::conflict(format!(
            "cannot cancel a {} reservation",
            header.status
        )));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute(
        "UPDATE inventory_items SET reserved_qty = MAX(reserved_qty - ri.qty, 0)
         FROM reservation_items ri
         WHERE ri.reservation_id = ? AND inventory_items.id = ri.item_id",
        [&header.id],
    )
    .map_err(HandlerErr::db_update)?;
    tx.execute(
        "UPDATE reservations SET status = 'CANCELLED', cancelled_at = ? WHERE id = ?",
        (&now_iso(), &header.id),
    )
    .map_err(HandlerErr::db_update)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "reservationId": header.id, "status": "CANCELLED" }))
}

fn reservations_mark_paid(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let header = cashier_header(conn, params)?;
    if header.status != "RESERVED" {
        return Err(HandlerErr::conflict(format!(
            "cannot mark a {} reservation paid",
            header.status
        )));
    }
    conn.execute(
        "UPDATE reservations SET status = 'PAID', paid_at = ? WHERE id = ?",
        (&now_iso(), &header.id),
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({ "reservationId": header.id, "status": "PAID" }))
}

fn reservations_mark_claimed(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let header = cashier_header(conn, params)?;
    if header.status != "RESERVED" && header.status != "PAID" {
        return Err(HandlerErr::conflict(format!(
            "cannot claim a {} reservation",
            header.status
        )));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let lines = load_lines(&tx, &header.id)?;
    // Re-validate against the counters as they stand now; any short line
    // aborts the whole claim with no counter movement.
    for line in &lines {
        let (stock_total, reserved_qty): (i64, i64) = tx
            .query_row(
                "SELECT stock_total, reserved_qty FROM inventory_items WHERE id = ?",
                [&line.item_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(HandlerErr::db_query)?;
        if line.qty > reserved_qty || line.qty > stock_total {
            return Err(HandlerErr {
                code: "insufficient_stock",
                message: format!("{} can no longer be claimed in full", line.item_name),
                details: Some(json!({
                    "itemId": line.item_id,
                    "qty": line.qty,
                    "stockTotal": stock_total,
                    "reservedQty": reserved_qty,
                })),
            });
        }
    }
    for line in &lines {
        tx.execute(
            "UPDATE inventory_items SET
                 stock_total = stock_total - ?1,
                 reserved_qty = reserved_qty - ?1
             WHERE id = ?2",
            (line.qty, &line.item_id),
        )
        .map_err(HandlerErr::db_update)?;
    }
    tx.execute(
        "UPDATE reservations SET status = 'CLAIMED', claimed_at = ? WHERE id = ?",
        (&now_iso(), &header.id),
    )
    .map_err(HandlerErr::db_update)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "reservationId": header.id, "status": "CLAIMED" }))
}

fn header_json(header: &ReservationHeader) -> serde_json::Value {
    json!({
        "reservationId": header.id,
        "enrollmentId": header.enrollment_id,
        "gradeLevel": header.student_grade_level,
        "reservedBy": header.reserved_by_user_id,
        "status": header.status,
        "createdAt": header.created_at,
        "paidAt": header.paid_at,
        "claimedAt": header.claimed_at,
        "cancelledAt": header.cancelled_at,
    })
}

fn reservations_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(
        params,
        &[Role::Cashier, Role::Student, Role::Parent],
    )?;
    let reservation_id = get_required_str(params, "reservationId")?;
    let header = load_header(conn, &reservation_id)?;
    match actor.role {
        Role::Cashier => {
            if actor.branch_id.as_deref() != Some(header.branch_id.as_str()) {
                return Err(HandlerErr::not_found("reservation not found"));
            }
        }
        _ => {
            let user_id = require_user(&actor)?;
            let owns = header.reserved_by_user_id == user_id
                || owns_enrollment(conn, &user_id, actor.role, header.enrollment_id.as_deref())?;
            if !owns {
                return Err(HandlerErr::unauthorized("not your reservation"));
            }
        }
    }

    let lines = load_lines(conn, &reservation_id)?;
    let mut uniform_cents = 0i64;
    let mut book_cents = 0i64;
    for line in &lines {
        if line.category == "BOOK" {
            book_cents += line.line_total_cents;
        } else {
            uniform_cents += line.line_total_cents;
        }
    }
    let lines_json: Vec<serde_json::Value> = lines
        .iter()
        .map(|l| {
            json!({
                "itemId": l.item_id,
                "itemName": l.item_name,
                "category": l.category,
                "qty": l.qty,
                "size": l.size_label,
                "unitPrice": money::cents_to_pesos(l.unit_price_cents),
                "lineTotal": money::cents_to_pesos(l.line_total_cents),
            })
        })
        .collect();

    let mut out = header_json(&header);
    out["lines"] = json!(lines_json);
    out["subtotals"] = json!({
        "uniform": money::cents_to_pesos(uniform_cents),
        "books": money::cents_to_pesos(book_cents),
    });
    out["total"] = json!(money::cents_to_pesos(uniform_cents + book_cents));
    Ok(out)
}

fn owns_enrollment(
    conn: &Connection,
    user_id: &str,
    role: Role,
    enrollment_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let Some(enrollment_id) = enrollment_id else {
        return Ok(false);
    };
    let sql = match role {
        Role::Student => "SELECT 1 FROM student_accounts WHERE user_id = ? AND enrollment_id = ?",
        Role::Parent => {
            "SELECT 1 FROM parent_student WHERE parent_user_id = ? AND enrollment_id = ?"
        }
        _ => return Ok(false),
    };
    conn.query_row(sql, (user_id, enrollment_id), |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db_query)
}

fn summaries(
    conn: &Connection,
    where_sql: &str,
    bind: &str,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let sql = format!(
        "SELECT r.id, r.enrollment_id, e.student_name, r.student_grade_level, r.status,
                r.created_at,
                (SELECT COALESCE(SUM(ri.line_total_cents), 0)
                 FROM reservation_items ri WHERE ri.reservation_id = r.id),
                (SELECT GROUP_CONCAT(ri.qty || 'x ' || i.item_name, ', ')
                 FROM reservation_items ri
                 JOIN inventory_items i ON i.id = ri.item_id
                 WHERE ri.reservation_id = r.id)
         FROM reservations r
         LEFT JOIN enrollments e ON e.id = r.enrollment_id
         WHERE {}
         ORDER BY r.created_at DESC",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    stmt.query_map([bind], |r| {
        Ok(json!({
            "reservationId": r.get::<_, String>(0)?,
            "enrollmentId": r.get::<_, Option<String>>(1)?,
            "studentName": r.get::<_, Option<String>>(2)?,
            "gradeLevel": r.get::<_, Option<String>>(3)?,
            "status": r.get::<_, String>(4)?,
            "createdAt": r.get::<_, String>(5)?,
            "total": money::cents_to_pesos(r.get::<_, i64>(6)?),
            "items": r.get::<_, Option<String>>(7)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

fn reservations_list_for_branch(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Cashier])?;
    let branch_id = require_branch(&actor)?;
    let rows = summaries(conn, "r.branch_id = ?1", &branch_id)?;
    Ok(json!({ "reservations": rows }))
}

fn reservations_list_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Student, Role::Parent])?;
    let user_id = require_user(&actor)?;
    let rows = match actor.role {
        Role::Parent => summaries(
            conn,
            "r.enrollment_id IN (SELECT enrollment_id FROM parent_student WHERE parent_user_id = ?1)
             OR r.reserved_by_user_id = ?1",
            &user_id,
        )?,
        _ => summaries(
            conn,
            "r.enrollment_id IN (SELECT enrollment_id FROM student_accounts WHERE user_id = ?1)
             OR r.reserved_by_user_id = ?1",
            &user_id,
        )?,
    };
    Ok(json!({ "reservations": rows }))
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
        "reservations.create" => Some(handle_gated(state, req, reservations_create)),
        "reservations.cancel" => Some(handle_gated(state, req, reservations_cancel)),
        "reservations.markPaid" => Some(handle_gated(state, req, reservations_mark_paid)),
        "reservations.markClaimed" => Some(handle_gated(state, req, reservations_mark_claimed)),
        "reservations.get" => Some(handle_gated(state, req, reservations_get)),
        "reservations.listForBranch" => {
            Some(handle_gated(state, req, reservations_list_for_branch))
        }
        "reservations.listForStudent" => {
            Some(handle_gated(state, req, reservations_list_for_student))
        }
        _ => None,
    }
}
