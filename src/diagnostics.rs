//! Diagnostics for Esperanza POS.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **System health**: schema version, row counts, database size, last
//!   catalog sync, mirror configuration
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files.

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::catalog;
use crate::db::{self, DbState};
use crate::error::PosResult;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix of the daily rolling log.
pub const LOG_FILE_PREFIX: &str = "pos";

/// Process start (epoch seconds), set by `run()`.
pub(crate) static APP_START_EPOCH: AtomicU64 = AtomicU64::new(0);

pub(crate) fn record_start() {
    APP_START_EPOCH.store(epoch_secs(), Ordering::Relaxed);
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// System health
// ---------------------------------------------------------------------------

fn count(conn: &rusqlite::Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap_or(0)
}

/// Snapshot of local store health. `mirror_configured` reports whether a
/// real spreadsheet backend was built at startup.
pub fn system_health(db: &DbState, mirror_configured: bool) -> PosResult<Value> {
    let (schema_version, products, users, sales, low_stock) = {
        let conn = db.lock()?;
        let low_stock: i64 = conn
            .query_row("SELECT COUNT(*) FROM products WHERE stock <= 0", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);
        (
            db::schema_version(&conn),
            count(&conn, "products"),
            count(&conn, "users"),
            count(&conn, "sales"),
            low_stock,
        )
    };

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);
    let started = APP_START_EPOCH.load(Ordering::Relaxed);
    let uptime = if started == 0 {
        0
    } else {
        epoch_secs().saturating_sub(started)
    };

    Ok(json!({
        "schemaVersion": schema_version,
        "products": products,
        "outOfStock": low_stock,
        "users": users,
        "sales": sales,
        "dbSizeBytes": db_size,
        "lastCatalogSync": catalog::last_sync_time(db)?,
        "mirrorConfigured": mirror_configured,
        "uptimeSecs": uptime,
    }))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Log directory under the store's data dir.
pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
