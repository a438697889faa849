use rusqlite::Connection;
use std::path::Path;

/// Tables owned by a tenant that generic record access may touch. Directory
/// tables (tenants, users, roles, guardian links) are managed elsewhere.
pub const TENANT_TABLES: [&str; 10] = [
    "school_details",
    "classes",
    "students",
    "fee_structure",
    "student_fees",
    "student_discounts",
    "expense_categories",
    "school_expenses",
    "notifications",
    "events",
];

/// Writes to these tables invalidate a tenant's cached aggregates.
pub const AGGREGATE_SOURCES: [&str; 7] = [
    "classes",
    "students",
    "fee_structure",
    "student_fees",
    "student_discounts",
    "expense_categories",
    "school_expenses",
];

pub fn is_tenant_table(table: &str) -> bool {
    TENANT_TABLES.contains(&table)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schoold.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    // LIKE is case-sensitive; ILIKE is compiled to LOWER(..) LIKE LOWER(..).
    conn.execute_batch("PRAGMA case_sensitive_like = ON;")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tenants(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            subdomain TEXT UNIQUE,
            status TEXT NOT NULL DEFAULT 'active',
            contact_email TEXT,
            subscription_plan TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS roles(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            role_name TEXT NOT NULL,
            tenant_id TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_roles_tenant ON roles(tenant_id)",
        [],
    )?;
    // Canonical roles 1..4, shared by users without a tenant.
    for (id, name) in [(1, "Admin"), (2, "Teacher"), (3, "Parent"), (4, "Student")] {
        conn.execute(
            "INSERT OR IGNORE INTO roles(id, role_name, tenant_id) VALUES(?, ?, NULL)",
            (id, name),
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            full_name TEXT,
            role_id INTEGER,
            tenant_id TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_tenant ON users(tenant_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS guardian_links(
            user_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            created_at TEXT,
            PRIMARY KEY(user_id, student_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_details(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            contact_email TEXT,
            school_code TEXT,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            section TEXT,
            academic_year TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            class_id TEXT,
            admission_no TEXT,
            academic_year TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_structure(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            class_id TEXT,
            student_id TEXT,
            fee_component TEXT NOT NULL,
            amount REAL NOT NULL DEFAULT 0,
            due_date TEXT,
            academic_year TEXT
        )",
        [],
    )?;
    // Older workspaces predate per-row discounts on fee structures.
    ensure_fee_structure_discount_columns(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_fees(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            fee_component TEXT,
            amount_paid REAL NOT NULL DEFAULT 0,
            payment_date TEXT,
            payment_mode TEXT,
            academic_year TEXT,
            receipt_number TEXT,
            remarks TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_discounts(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            class_id TEXT,
            fee_component TEXT,
            discount_type TEXT NOT NULL,
            discount_value REAL NOT NULL DEFAULT 0,
            academic_year TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            reason TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS expense_categories(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            monthly_budget REAL NOT NULL DEFAULT 0,
            color TEXT,
            icon TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_expenses(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            title TEXT,
            category TEXT,
            amount REAL NOT NULL DEFAULT 0,
            expense_date TEXT,
            description TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            type TEXT,
            message TEXT,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            title TEXT,
            event_date TEXT,
            description TEXT
        )",
        [],
    )?;

    for table in TENANT_TABLES {
        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS idx_{table}_tenant ON {table}(tenant_id)"),
            [],
        )?;
    }
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(tenant_id, class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_fees_student ON student_fees(tenant_id, student_id)",
        [],
    )?;

    Ok(())
}

fn ensure_fee_structure_discount_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "fee_structure", "base_amount")? {
        conn.execute("ALTER TABLE fee_structure ADD COLUMN base_amount REAL", [])?;
    }
    if !table_has_column(conn, "fee_structure", "discount_applied")? {
        conn.execute(
            "ALTER TABLE fee_structure ADD COLUMN discount_applied REAL NOT NULL DEFAULT 0",
            [],
        )?;
    }
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
