use crate::grades;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_amount_cents, get_opt_str, get_required_qty, get_required_str, new_id, now_iso,
    require_actor, require_branch, HandlerErr,
};
use crate::ipc::types::{Actor, AppState, Request, Role};
use crate::money;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

struct ItemRow {
    id: String,
    category: String,
    item_name: String,
    grade_level: Option<String>,
    is_common: bool,
    size_label: Option<String>,
    price_cents: i64,
    stock_total: i64,
    reserved_qty: i64,
    image_url: Option<String>,
    is_active: bool,
}

fn load_item(conn: &Connection, item_id: &str, branch_id: &str) -> Result<ItemRow, HandlerErr> {
    conn.query_row(
        "SELECT id, category, item_name, grade_level, is_common, size_label,
                price_cents, stock_total, reserved_qty, image_url, is_active
         FROM inventory_items WHERE id = ? AND branch_id = ?",
        (item_id, branch_id),
        |r| {
            Ok(ItemRow {
                id: r.get(0)?,
                category: r.get(1)?,
                item_name: r.get(2)?,
                grade_level: r.get(3)?,
                is_common: r.get::<_, i64>(4)? != 0,
                size_label: r.get(5)?,
                price_cents: r.get(6)?,
                stock_total: r.get(7)?,
                reserved_qty: r.get(8)?,
                image_url: r.get(9)?,
                is_active: r.get::<_, i64>(10)? != 0,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("item not found"))
}

fn item_has_sizes(conn: &Connection, item_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM inventory_item_sizes WHERE item_id = ? LIMIT 1",
        [item_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

/// Parent counters follow the size rows whenever size rows exist. Must run
/// inside the same transaction as the size-level write.
pub fn recompute_item_totals(conn: &Connection, item_id: &str) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE inventory_items SET
             stock_total = (SELECT COALESCE(SUM(stock_total), 0)
                            FROM inventory_item_sizes WHERE item_id = ?1),
             reserved_qty = (SELECT COALESCE(SUM(reserved_qty), 0)
                             FROM inventory_item_sizes WHERE item_id = ?1)
         WHERE id = ?1",
        [item_id],
    )
    .map_err(HandlerErr::db_update)?;
    Ok(())
}

fn librarian_books_only(actor: &Actor, category: &str) -> Result<(), HandlerErr> {
    if actor.role == Role::Librarian && category != "BOOK" {
        return Err(HandlerErr::unauthorized(
            "librarians manage BOOK items only",
        ));
    }
    Ok(())
}

fn inventory_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::BranchAdmin, Role::Librarian])?;
    let branch_id = require_branch(&actor)?;
    let category = get_required_str(params, "category")?.to_uppercase();
    if category != "UNIFORM" && category != "BOOK" {
        return Err(HandlerErr::bad_params(
            "category must be UNIFORM or BOOK",
        ));
    }
    librarian_books_only(&actor, &category)?;
    let item_name = get_required_str(params, "itemName")?;
    let grade_level = get_opt_str(params, "gradeLevel")
        .and_then(|g| grades::normalize_grade_level(&g));
    let is_common = params
        .get("isCommon")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let price_cents = get_amount_cents(params, "price")?;
    let stock = params.get("stock").and_then(|v| v.as_i64()).unwrap_or(0);
    if stock < 0 {
        return Err(HandlerErr::bad_params("stock must not be negative"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO inventory_items(
             id, branch_id, category, item_name, grade_level, is_common, size_label,
             price_cents, stock_total, reserved_qty, image_url, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 1, ?)",
        rusqlite::params![
            id,
            branch_id,
            category,
            item_name,
            grade_level,
            is_common as i64,
            get_opt_str(params, "sizeLabel"),
            price_cents,
            stock,
            get_opt_str(params, "imageUrl"),
            now_iso(),
        ],
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({ "itemId": id }))
}

fn item_json(item: &ItemRow, sizes: Option<&Vec<serde_json::Value>>) -> serde_json::Value {
    let available = item.stock_total - item.reserved_qty;
    let mut v = json!({
        "itemId": item.id,
        "category": item.category,
        "itemName": item.item_name,
        "gradeLevel": item.grade_level,
        "gradeDisplay": grades::grade_display(&item.item_name, item.grade_level.as_deref()),
        "isCommon": item.is_common,
        "sizeLabel": item.size_label,
        "price": money::cents_to_pesos(item.price_cents),
        "stockTotal": item.stock_total,
        "reservedQty": item.reserved_qty,
        "available": available,
        "imageUrl": item.image_url,
        "isActive": item.is_active,
    });
    if let Some(sizes) = sizes {
        v["sizes"] = json!(sizes);
    }
    v
}

fn inventory_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(
        params,
        &[
            Role::BranchAdmin,
            Role::Registrar,
            Role::Cashier,
            Role::Librarian,
            Role::Teacher,
        ],
    )?;
    let branch_id = require_branch(&actor)?;
    let category = get_opt_str(params, "category").map(|c| c.to_uppercase());
    let search = get_opt_str(params, "search").map(|s| s.to_lowercase());
    let grade_filter = get_opt_str(params, "grade");
    let status = get_opt_str(params, "status");

    let mut stmt = conn
        .prepare(
            "SELECT id, category, item_name, grade_level, is_common, size_label,
                    price_cents, stock_total, reserved_qty, image_url, is_active
             FROM inventory_items WHERE branch_id = ?",
        )
        .map_err(HandlerErr::db_query)?;
    let mut items = stmt
        .query_map([&branch_id], |r| {
            Ok(ItemRow {
                id: r.get(0)?,
                category: r.get(1)?,
                item_name: r.get(2)?,
                grade_level: r.get(3)?,
                is_common: r.get::<_, i64>(4)? != 0,
                size_label: r.get(5)?,
                price_cents: r.get(6)?,
                stock_total: r.get(7)?,
                reserved_qty: r.get(8)?,
                image_url: r.get(9)?,
                is_active: r.get::<_, i64>(10)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    items.retain(|item| {
        if let Some(cat) = &category {
            if item.category != *cat {
                return false;
            }
        }
        if let Some(q) = &search {
            let in_name = item.item_name.to_lowercase().contains(q.as_str());
            let in_label = item
                .size_label
                .as_deref()
                .map(|s| s.to_lowercase().contains(q.as_str()))
                .unwrap_or(false);
            if !in_name && !in_label {
                return false;
            }
        }
        if let Some(g) = &grade_filter {
            if !grades::item_matches_grade_filter(&item.item_name, item.grade_level.as_deref(), g)
            {
                return false;
            }
        }
        match status.as_deref() {
            Some("active") => item.is_active,
            Some("inactive") => !item.is_active,
            _ => true,
        }
    });

    // Books first, then uniforms; inside a category Nursery -> Grade 12, then name.
    items.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then_with(|| {
                grades::grade_order(a.grade_level.as_deref())
                    .cmp(&grades::grade_order(b.grade_level.as_deref()))
            })
            .then_with(|| a.item_name.cmp(&b.item_name))
    });

    let mut sizes_by_item: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    {
        let mut size_stmt = conn
            .prepare(
                "SELECT s.item_id, s.size_label, s.stock_total, s.reserved_qty
                 FROM inventory_item_sizes s
                 JOIN inventory_items i ON i.id = s.item_id
                 WHERE i.branch_id = ?",
            )
            .map_err(HandlerErr::db_query)?;
        let mut size_rows = size_stmt
            .query_map([&branch_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?;
        size_rows.sort_by_key(|(_, label, _, _)| grades::size_sort_key(label));
        for (item_id, label, stock, reserved) in size_rows {
            sizes_by_item.entry(item_id).or_default().push(json!({
                "sizeLabel": label,
                "stockTotal": stock,
                "reservedQty": reserved,
                "available": stock - reserved,
            }));
        }
    }

    let mut total_stock = 0i64;
    let mut total_reserved = 0i64;
    let mut low_stock = 0i64;
    let mut out_of_stock = 0i64;
    for item in &items {
        total_stock += item.stock_total;
        total_reserved += item.reserved_qty;
        let available = item.stock_total - item.reserved_qty;
        if available <= 0 {
            out_of_stock += 1;
        } else if available < 10 {
            low_stock += 1;
        }
    }

    let rows: Vec<serde_json::Value> = items
        .iter()
        .map(|item| item_json(item, sizes_by_item.get(&item.id)))
        .collect();

    Ok(json!({
        "items": rows,
        "stats": {
            "itemCount": items.len(),
            "totalStock": total_stock,
            "totalReserved": total_reserved,
            "lowStock": low_stock,
            "outOfStock": out_of_stock,
        }
    }))
}

fn inventory_create_sizes(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::BranchAdmin])?;
    let branch_id = require_branch(&actor)?;
    let item_id = get_required_str(params, "itemId")?;
    load_item(conn, &item_id, &branch_id)?;
    if item_has_sizes(conn, &item_id)? {
        return Err(HandlerErr::conflict("item already has size rows"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    for size in grades::SIZE_ORDER {
        tx.execute(
            "INSERT INTO inventory_item_sizes(id, item_id, size_label, stock_total, reserved_qty)
             VALUES(?, ?, ?, 0, 0)",
            (&new_id(), &item_id, size),
        )
        .map_err(HandlerErr::db_update)?;
    }
    recompute_item_totals(&tx, &item_id)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "itemId": item_id, "sizes": grades::SIZE_ORDER }))
}

fn inventory_restock(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::BranchAdmin, Role::Librarian])?;
    let branch_id = require_branch(&actor)?;
    let item_id = get_required_str(params, "itemId")?;
    let qty = get_required_qty(params, "qty")?;
    let item = load_item(conn, &item_id, &branch_id)?;
    librarian_books_only(&actor, &item.category)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    if item_has_sizes(&tx, &item_id)? {
        let size = get_required_str(params, "size").map_err(|_| {
            HandlerErr::bad_params("item is sized, size is required for restock")
        })?;
        let changed = tx
            .execute(
                "UPDATE inventory_item_sizes SET stock_total = stock_total + ?
                 WHERE item_id = ? AND size_label = ?",
                (qty, &item_id, &size.to_uppercase()),
            )
            .map_err(HandlerErr::db_update)?;
        if changed == 0 {
            return Err(HandlerErr::not_found(format!(
                "no size row {} for item",
                size
            )));
        }
        recompute_item_totals(&tx, &item_id)?;
    } else {
        tx.execute(
            "UPDATE inventory_items SET stock_total = stock_total + ? WHERE id = ?",
            (qty, &item_id),
        )
        .map_err(HandlerErr::db_update)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let after = load_item(conn, &item_id, &branch_id)?;
    Ok(json!({
        "itemId": item_id,
        "stockTotal": after.stock_total,
        "reservedQty": after.reserved_qty,
        "available": after.stock_total - after.reserved_qty,
    }))
}

fn inventory_set_price(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::BranchAdmin, Role::Librarian])?;
    let branch_id = require_branch(&actor)?;
    let item_id = get_required_str(params, "itemId")?;
    let price_cents = get_amount_cents(params, "price")?;
    if price_cents <= 0 {
        return Err(HandlerErr::bad_params("price must be greater than zero"));
    }
    let item = load_item(conn, &item_id, &branch_id)?;
    librarian_books_only(&actor, &item.category)?;
    conn.execute(
        "UPDATE inventory_items SET price_cents = ? WHERE id = ?",
        (price_cents, &item_id),
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({ "itemId": item_id, "price": money::cents_to_pesos(price_cents) }))
}

fn inventory_toggle(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_actor(params, &[Role::BranchAdmin])?;
    let branch_id = require_branch(&actor)?;
    let item_id = get_required_str(params, "itemId")?;
    let item = load_item(conn, &item_id, &branch_id)?;
    let next = !item.is_active;
    conn.execute(
        "UPDATE inventory_items SET is_active = ? WHERE id = ?",
        (next as i64, &item_id),
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({ "itemId": item_id, "isActive": next }))
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
        "inventory.add" => Some(handle_gated(state, req, inventory_add)),
        "inventory.list" => Some(handle_gated(state, req, inventory_list)),
        "inventory.createSizes" => Some(handle_gated(state, req, inventory_create_sizes)),
        "inventory.restock" => Some(handle_gated(state, req, inventory_restock)),
        "inventory.setPrice" => Some(handle_gated(state, req, inventory_set_price)),
        "inventory.toggle" => Some(handle_gated(state, req, inventory_toggle)),
        _ => None,
    }
}
