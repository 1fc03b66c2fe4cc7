//! Local SQLite database layer.
//!
//! Uses rusqlite with WAL mode. Owns the schema (products, users, sales,
//! sale lines, local settings), first-run user seeding and the small
//! settings helpers shared by the engines. One `DbState` is shared by every
//! session; SQLite serializes concurrent writers itself.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{PosError, PosResult};
use crate::models::Role;

/// Shared handle to the local store.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    pub fn lock(&self) -> PosResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| PosError::LockPoisoned)
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

pub const DEFAULT_MANAGER_NAME: &str = "Admin";
pub const DEFAULT_EMPLOYEE_NAME: &str = "Cajero1";
const DEFAULT_EMPLOYEE_PASSWORD: &str = "1234";
/// Used only when no admin password secret is configured.
const FALLBACK_ADMIN_PASSWORD: &str = "admin123";

/// Initialize the database at `{data_dir}/inventario.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas and
/// runs pending migrations. If the file cannot be opened it is moved aside
/// to `inventario.db.corrupt` and a fresh database is created.
pub fn init(data_dir: &Path) -> PosResult<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("inventario.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), moving file aside and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::rename(&db_path, db_path.with_extension("db.corrupt"));
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

fn open_and_configure(path: &Path) -> PosResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Migration v1: catalog, staff, sales.
///
/// Money columns are TEXT holding a decimal string so totals and change
/// stay exact.
fn migrate_v1(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            barcode TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            price TEXT NOT NULL DEFAULT '0',
            stock INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            password TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('Manager', 'Employee'))
        );

        CREATE TABLE IF NOT EXISTS sales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            total TEXT NOT NULL,
            cashier TEXT NOT NULL
        );

        -- sale_id references sales without ON DELETE CASCADE
        CREATE TABLE IF NOT EXISTS sale_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sale_id INTEGER NOT NULL REFERENCES sales(id),
            product_name TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            unit_price TEXT NOT NULL,
            subtotal TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (setting_category, setting_key)
        );

        CREATE INDEX IF NOT EXISTS idx_sale_lines_sale_id ON sale_lines(sale_id);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        ",
    )?;
    Ok(())
}

/// Seed the default Manager and Employee accounts when the users table is
/// empty. Returns `true` when seeding happened.
///
/// `admin_password` comes from the configured secret. Without it the
/// Manager account gets a well-known fallback password and a warning is
/// logged on every first run.
pub fn seed_default_users(conn: &Connection, admin_password: Option<&str>) -> PosResult<bool> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    if count > 0 {
        return Ok(false);
    }

    let admin_password = match admin_password.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => p,
        None => {
            warn!(
                user = DEFAULT_MANAGER_NAME,
                "no admin password secret configured; seeding manager with the built-in fallback password. Set POS_ADMIN_PASSWORD or the keyring entry before deploying"
            );
            FALLBACK_ADMIN_PASSWORD
        }
    };

    conn.execute(
        "INSERT INTO users (name, password, role) VALUES (?1, ?2, ?3)",
        params![DEFAULT_MANAGER_NAME, admin_password, Role::Manager.as_str()],
    )?;
    conn.execute(
        "INSERT INTO users (name, password, role) VALUES (?1, ?2, ?3)",
        params![
            DEFAULT_EMPLOYEE_NAME,
            DEFAULT_EMPLOYEE_PASSWORD,
            Role::Employee.as_str()
        ],
    )?;
    info!("seeded default manager and employee accounts");
    Ok(true)
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .optional()
    .ok()
    .flatten()
}

pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> PosResult<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key)
         DO UPDATE SET setting_value = excluded.setting_value, updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

pub fn schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Read a TEXT money column as a `Decimal`.
pub fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(raw.trim())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
pub fn open_in_memory_for_test() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("pragmas");
    run_migrations(&conn).expect("migrations");
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}
