use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("liceo.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS branches(
            id TEXT PRIMARY KEY,
            branch_code TEXT NOT NULL UNIQUE,
            branch_name TEXT NOT NULL UNIQUE,
            location TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            branch_id TEXT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            grade_level TEXT,
            require_password_change INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(branch_id) REFERENCES branches(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_branch ON users(branch_id)",
        [],
    )?;

    // Teacher grade assignment arrived after the first schema cut.
    ensure_users_grade_level(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            branch_id TEXT NOT NULL,
            branch_enrollment_no INTEGER NOT NULL,
            student_name TEXT NOT NULL,
            grade_level TEXT NOT NULL,
            gender TEXT,
            dob TEXT,
            address TEXT,
            contact_number TEXT,
            guardian_name TEXT,
            guardian_contact TEXT,
            previous_school TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            FOREIGN KEY(branch_id) REFERENCES branches(id),
            UNIQUE(branch_id, branch_enrollment_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_branch ON enrollments(branch_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_branch_status ON enrollments(branch_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_accounts(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_student(
            parent_user_id TEXT NOT NULL,
            enrollment_id TEXT NOT NULL,
            relationship TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(parent_user_id, enrollment_id),
            FOREIGN KEY(parent_user_id) REFERENCES users(id),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parent_student_enrollment ON parent_student(enrollment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS inventory_items(
            id TEXT PRIMARY KEY,
            branch_id TEXT NOT NULL,
            category TEXT NOT NULL,
            item_name TEXT NOT NULL,
            grade_level TEXT,
            is_common INTEGER NOT NULL DEFAULT 0,
            size_label TEXT,
            price_cents INTEGER NOT NULL DEFAULT 0,
            stock_total INTEGER NOT NULL DEFAULT 0,
            reserved_qty INTEGER NOT NULL DEFAULT 0,
            image_url TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(branch_id) REFERENCES branches(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_inventory_items_branch ON inventory_items(branch_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_inventory_items_branch_category ON inventory_items(branch_id, category)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS inventory_item_sizes(
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            size_label TEXT NOT NULL,
            stock_total INTEGER NOT NULL DEFAULT 0,
            reserved_qty INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(item_id) REFERENCES inventory_items(id),
            UNIQUE(item_id, size_label)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_inventory_item_sizes_item ON inventory_item_sizes(item_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reservations(
            id TEXT PRIMARY KEY,
            branch_id TEXT NOT NULL,
            enrollment_id TEXT,
            student_grade_level TEXT,
            reserved_by_user_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'RESERVED',
            created_at TEXT NOT NULL,
            paid_at TEXT,
            claimed_at TEXT,
            cancelled_at TEXT,
            FOREIGN KEY(branch_id) REFERENCES branches(id),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(reserved_by_user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reservations_branch ON reservations(branch_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reservations_enrollment ON reservations(enrollment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reservation_items(
            id TEXT PRIMARY KEY,
            reservation_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            qty INTEGER NOT NULL,
            size_label TEXT,
            unit_price_cents INTEGER NOT NULL,
            line_total_cents INTEGER NOT NULL,
            FOREIGN KEY(reservation_id) REFERENCES reservations(id),
            FOREIGN KEY(item_id) REFERENCES inventory_items(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reservation_items_reservation ON reservation_items(reservation_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reservation_items_item ON reservation_items(item_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS billing(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL UNIQUE,
            branch_id TEXT NOT NULL,
            tuition_cents INTEGER NOT NULL DEFAULT 0,
            books_cents INTEGER NOT NULL DEFAULT 0,
            uniform_cents INTEGER NOT NULL DEFAULT 0,
            other_cents INTEGER NOT NULL DEFAULT 0,
            total_cents INTEGER NOT NULL,
            paid_cents INTEGER NOT NULL DEFAULT 0,
            balance_cents INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(branch_id) REFERENCES branches(id),
            FOREIGN KEY(created_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_billing_branch ON billing(branch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            bill_id TEXT NOT NULL,
            enrollment_id TEXT NOT NULL,
            branch_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            payment_method TEXT NOT NULL,
            receipt_number TEXT NOT NULL UNIQUE,
            notes TEXT,
            received_by TEXT NOT NULL,
            paid_at TEXT NOT NULL,
            FOREIGN KEY(bill_id) REFERENCES billing(id),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(branch_id) REFERENCES branches(id),
            FOREIGN KEY(received_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_bill ON payments(bill_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_branch ON payments(branch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS book_releases(
            id TEXT PRIMARY KEY,
            branch_id TEXT NOT NULL,
            enrollment_id TEXT,
            student_name TEXT,
            released_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(branch_id) REFERENCES branches(id),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(released_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_book_releases_branch ON book_releases(branch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS book_release_items(
            id TEXT PRIMARY KEY,
            release_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            qty INTEGER NOT NULL,
            unit_price_cents INTEGER NOT NULL,
            FOREIGN KEY(release_id) REFERENCES book_releases(id),
            FOREIGN KEY(item_id) REFERENCES inventory_items(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_book_release_items_release ON book_release_items(release_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_users_grade_level(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "grade_level")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE users ADD COLUMN grade_level TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
