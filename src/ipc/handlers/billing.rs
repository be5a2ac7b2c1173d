use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    ensure_branch_active, get_amount_cents, get_opt_str, get_required_str, new_id, now_iso,
    require_actor, require_branch, require_user, HandlerErr,
};
use crate::ipc::types::{AppState, Request, Role};
use crate::money;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn receipt_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
    format!("OR-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

struct BillRow {
    id: String,
    enrollment_id: String,
    branch_id: String,
    tuition_cents: i64,
    books_cents: i64,
    uniform_cents: i64,
    other_cents: i64,
    total_cents: i64,
    paid_cents: i64,
    balance_cents: i64,
    status: String,
}

fn load_bill(conn: &Connection, bill_id: &str) -> Result<BillRow, HandlerErr> {
    conn.query_row(
        "SELECT id, enrollment_id, branch_id, tuition_cents, books_cents, uniform_cents,
                other_cents, total_cents, paid_cents, balance_cents, status
         FROM billing WHERE id = ?",
        [bill_id],
        |r| {
            Ok(BillRow {
                id: r.get(0)?,
                enrollment_id: r.get(1)?,
                branch_id: r.get(2)?,
                tuition_cents: r.get(3)?,
                books_cents: r.get(4)?,
                uniform_cents: r.get(5)?,
                other_cents: r.get(6)?,
                total_cents: r.get(7)?,
                paid_cents: r.get(8)?,
                balance_cents: r.get(9)?,
                status: r.get(10)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("bill not found"))
}

fn billing_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Cashier])?;
    let branch_id = require_branch(&actor)?;
    let cashier_id = require_user(&actor)?;
    ensure_branch_active(conn, &branch_id)?;
    let enrollment_id = get_required_str(params, "enrollmentId")?;

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
        Some("approved") => {}
        Some(other) => {
            return Err(HandlerErr::conflict(format!(
                "enrollment is {}, only approved enrollments are billed",
                other
            )))
        }
    }
    let existing: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM billing WHERE enrollment_id = ?",
            [&enrollment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if existing.is_some() {
        return Err(HandlerErr::conflict("a bill already exists for this enrollment"));
    }

    let tuition = get_amount_cents(params, "tuition")?;
    let books = get_amount_cents(params, "books")?;
    let uniform = get_amount_cents(params, "uniform")?;
    let other = get_amount_cents(params, "other")?;
    let total = tuition
        .checked_add(books)
        .and_then(|t| t.checked_add(uniform))
        .and_then(|t| t.checked_add(other))
        .ok_or_else(|| HandlerErr::bad_params("bill total is too large"))?;
    if total <= 0 {
        return Err(HandlerErr::bad_params("bill total must be greater than zero"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO billing(
             id, enrollment_id, branch_id, tuition_cents, books_cents, uniform_cents,
             other_cents, total_cents, paid_cents, balance_cents, status, created_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 'pending', ?, ?)",
        rusqlite::params![
            id,
            enrollment_id,
            branch_id,
            tuition,
            books,
            uniform,
            other,
            total,
            total,
            cashier_id,
            now_iso(),
        ],
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({
        "billId": id,
        "total": money::cents_to_pesos(total),
        "balance": money::cents_to_pesos(total),
        "status": "pending",
    }))
}

fn billing_record_payment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::Cashier])?;
    let branch_id = require_branch(&actor)?;
    let cashier_id = require_user(&actor)?;
    ensure_branch_active(conn, &branch_id)?;
    let bill_id = get_required_str(params, "billId")?;
    let method = get_required_str(params, "method")?;
    let amount = params
        .get("amount")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params("missing amount"))?;
    let amount_cents = money::pesos_to_cents(amount)
        .filter(|c| *c > 0)
        .ok_or_else(|| HandlerErr::bad_params("amount must be greater than zero"))?;

    let bill = load_bill(conn, &bill_id)?;
    if bill.branch_id != branch_id {
        return Err(HandlerErr::not_found("bill not found"));
    }
    if bill.status == "paid" {
        return Err(HandlerErr::conflict("bill is already paid in full"));
    }
    if amount_cents > bill.balance_cents {
        return Err(HandlerErr {
            code: "overpayment",
            message: format!(
                "payment of {} exceeds the remaining balance of {}",
                money::cents_to_pesos(amount_cents),
                money::cents_to_pesos(bill.balance_cents)
            ),
            details: Some(json!({
                "balance": money::cents_to_pesos(bill.balance_cents),
            })),
        });
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let receipt = receipt_number();
    tx.execute(
        "INSERT INTO payments(
             id, bill_id, enrollment_id, branch_id, amount_cents, payment_method,
             receipt_number, notes, received_by, paid_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            new_id(),
            bill_id,
            bill.enrollment_id,
            branch_id,
            amount_cents,
            method,
            receipt,
            get_opt_str(params, "notes"),
            cashier_id,
            now_iso(),
        ],
    )
    .map_err(HandlerErr::db_update)?;

    let paid = bill
        .paid_cents
        .checked_add(amount_cents)
        .ok_or_else(|| HandlerErr::bad_params("payment total is too large"))?;
    let balance = (bill.total_cents - paid).max(0);
    let status = if balance == 0 { "paid" } else { "partial" };
    tx.execute(
        "UPDATE billing SET paid_cents = ?, balance_cents = ?, status = ? WHERE id = ?",
        rusqlite::params![paid, balance, status, bill_id],
    )
    .map_err(HandlerErr::db_update)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "billId": bill_id,
        "receiptNumber": receipt,
        "amount": money::cents_to_pesos(amount_cents),
        "paid": money::cents_to_pesos(paid),
        "balance": money::cents_to_pesos(balance),
        "status": status,
    }))
}

fn billing_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(
        params,
        &[Role::Cashier, Role::BranchAdmin, Role::Student, Role::Parent],
    )?;
    let bill_id = get_required_str(params, "billId")?;
    let bill = load_bill(conn, &bill_id)?;
    match actor.role {
        Role::Cashier | Role::BranchAdmin => {
            if actor.branch_id.as_deref() != Some(bill.branch_id.as_str()) {
                return Err(HandlerErr::not_found("bill not found"));
            }
        }
        Role::Student => {
            let user_id = require_user(&actor)?;
            let linked: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM student_accounts WHERE user_id = ? AND enrollment_id = ?",
                    (&user_id, &bill.enrollment_id),
                    |r| r.get(0),
                )
                .optional()
                .map_err(HandlerErr::db_query)?;
            if linked.is_none() {
                return Err(HandlerErr::unauthorized("not your bill"));
            }
        }
        _ => {
            let user_id = require_user(&actor)?;
            let linked: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM parent_student WHERE parent_user_id = ? AND enrollment_id = ?",
                    (&user_id, &bill.enrollment_id),
                    |r| r.get(0),
                )
                .optional()
                .map_err(HandlerErr::db_query)?;
            if linked.is_none() {
                return Err(HandlerErr::unauthorized("not your bill"));
            }
        }
    }

    let (student_name, grade_level): (String, Option<String>) = conn
        .query_row(
            "SELECT student_name, grade_level FROM enrollments WHERE id = ?",
            [&bill.enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::db_query)?;

    let mut stmt = conn
        .prepare(
            "SELECT amount_cents, payment_method, receipt_number, notes, paid_at
             FROM payments WHERE bill_id = ? ORDER BY paid_at",
        )
        .map_err(HandlerErr::db_query)?;
    let payments = stmt
        .query_map([&bill_id], |r| {
            Ok(json!({
                "amount": money::cents_to_pesos(r.get::<_, i64>(0)?),
                "method": r.get::<_, String>(1)?,
                "receiptNumber": r.get::<_, String>(2)?,
                "notes": r.get::<_, Option<String>>(3)?,
                "paidAt": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "billId": bill.id,
        "enrollmentId": bill.enrollment_id,
        "studentName": student_name,
        "gradeLevel": grade_level,
        "components": {
            "tuition": money::cents_to_pesos(bill.tuition_cents),
            "books": money::cents_to_pesos(bill.books_cents),
            "uniform": money::cents_to_pesos(bill.uniform_cents),
            "other": money::cents_to_pesos(bill.other_cents),
        },
        "total": money::cents_to_pesos(bill.total_cents),
        "paid": money::cents_to_pesos(bill.paid_cents),
        "balance": money::cents_to_pesos(bill.balance_cents),
        "status": bill.status,
        "payments": payments,
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
        "billing.create" => Some(handle_gated(state, req, billing_create)),
        "billing.recordPayment" => Some(handle_gated(state, req, billing_record_payment)),
        "billing.get" => Some(handle_gated(state, req, billing_get)),
        _ => None,
    }
}
