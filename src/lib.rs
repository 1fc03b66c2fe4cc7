//! Esperanza POS backend.
//!
//! Engines for a single-store point of sale: staff login, a catalog mirrored
//! from a remote spreadsheet, cart building and checkout against a local
//! SQLite store, and sales reporting. A UI shell owns one [`session::Session`]
//! per connected user and calls into these modules; [`App`] bundles the
//! process-wide pieces it needs.

use anyhow::Context;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod mirror;
pub mod models;
pub mod receipt;
pub mod reports;
pub mod session;
pub mod storage;

use catalog::{CatalogSync, SheetCatalog, SyncReport};
use config::StoreConfig;
use error::PosResult;
use mirror::{SheetClient, UnconfiguredSheets};
use session::Session;

/// Process-wide state shared by every session.
pub struct App {
    pub db: db::DbState,
    pub catalog: SheetCatalog,
    pub config: StoreConfig,
    mirror_configured: bool,
}

/// What happened at the start of a shell interaction.
#[derive(Debug)]
pub struct Interaction {
    /// The session sat idle too long and was logged out.
    pub timed_out: bool,
    /// Catalog pull run because this was the session's first interaction.
    pub sync: Option<SyncReport>,
}

impl App {
    /// Open the local store under `config.data_dir`, seed the default
    /// accounts on first run and connect the mirror.
    pub fn open(config: StoreConfig) -> anyhow::Result<Self> {
        let db = db::init(&config.data_dir).context("failed to initialize local database")?;
        {
            let conn = db.lock()?;
            let admin_password = storage::admin_password_secret();
            db::seed_default_users(&conn, admin_password.as_deref().map(String::as_str))
                .context("failed to seed default users")?;
        }
        let (sheets, configured) = build_mirror(&config);
        Ok(Self::with_mirror(config, db, sheets, configured))
    }

    pub fn with_mirror(
        config: StoreConfig,
        db: db::DbState,
        sheets: Arc<dyn SheetClient>,
        mirror_configured: bool,
    ) -> Self {
        Self {
            db,
            catalog: SheetCatalog::new(sheets, config.clone()),
            config,
            mirror_configured,
        }
    }

    pub fn mirror_configured(&self) -> bool {
        self.mirror_configured
    }

    pub fn new_session(&self) -> Session {
        Session::new(self.config.idle_timeout_secs)
    }

    /// Call before handling any user action: enforces the idle timeout and
    /// runs the once-per-session catalog pull.
    pub fn begin_interaction(&self, session: &mut Session) -> PosResult<Interaction> {
        let timed_out = session.check_timeout(Utc::now());
        let sync = catalog::ensure_session_synced(&self.db, &self.catalog, session)?;
        Ok(Interaction { timed_out, sync })
    }
}

/// Sheets client when both a spreadsheet id and an access token are
/// available; otherwise a backend that fails every call.
fn build_mirror(config: &StoreConfig) -> (Arc<dyn SheetClient>, bool) {
    let Some(spreadsheet_id) = config.spreadsheet_id.as_deref() else {
        warn!("POS_SPREADSHEET_ID not set, running without spreadsheet mirror");
        return (
            Arc::new(UnconfiguredSheets::new("no spreadsheet id configured")),
            false,
        );
    };
    let Some(token) = storage::sheets_access_token() else {
        warn!("no Sheets access token in environment or keyring, running without spreadsheet mirror");
        return (
            Arc::new(UnconfiguredSheets::new("no access token configured")),
            false,
        );
    };
    match api::SheetsApiClient::new(&config.sheets_api_base, spreadsheet_id, token) {
        Ok(client) => (Arc::new(client), true),
        Err(e) => {
            warn!(error = %e, "failed to build Sheets client");
            (Arc::new(UnconfiguredSheets::new(e.to_string())), false)
        }
    }
}

/// Console plus daily rolling file under `log_dir`. The returned guard must
/// live until exit so buffered lines are flushed.
fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,esperanza_pos_lib=debug"));

    diagnostics::prune_old_logs(log_dir);
    let console_layer = fmt::layer().with_target(true);

    if let Err(e) = std::fs::create_dir_all(log_dir) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        warn!("log directory {} unavailable ({e}), console logging only", log_dir.display());
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Some(guard)
}

// ============================================================================
// App entry point
// ============================================================================

pub fn run() -> anyhow::Result<()> {
    diagnostics::record_start();

    let config = StoreConfig::from_env();
    let _log_guard = init_logging(&diagnostics::log_dir(&config.data_dir));
    info!("Starting Esperanza POS v{}", env!("CARGO_PKG_VERSION"));

    let app = App::open(config)?;

    // Start-of-day catalog pull
    let report = app
        .catalog
        .sync_down(&app.db)
        .context("catalog sync failed against local store")?;
    if report.success {
        info!(products = report.synced, "{}", report.message);
    } else {
        warn!("{}", report.message);
    }

    let health = diagnostics::system_health(&app.db, app.mirror_configured())?;
    info!(%health, "ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::testing::MemorySheets;
    use chrono::Duration;
    use serde_json::json;

    fn app_with_memory_mirror() -> (App, Arc<MemorySheets>) {
        let sheets = Arc::new(MemorySheets::with_standard_sheets());
        sheets.push_product(json!("7501"), "Pen", json!(5), json!(10));
        let db = db::open_in_memory_for_test();
        {
            let conn = db.lock().unwrap();
            db::seed_default_users(&conn, Some("pw")).unwrap();
        }
        let app = App::with_mirror(StoreConfig::default(), db, sheets.clone(), true);
        (app, sheets)
    }

    #[test]
    fn first_interaction_pulls_catalog_once() {
        let (app, _sheets) = app_with_memory_mirror();
        let mut session = app.new_session();

        let first = app.begin_interaction(&mut session).unwrap();
        assert!(!first.timed_out);
        assert!(first.sync.unwrap().success);
        assert_eq!(catalog::list_products(&app.db).unwrap().len(), 1);

        let second = app.begin_interaction(&mut session).unwrap();
        assert!(second.sync.is_none());
    }

    #[test]
    fn idle_session_is_logged_out_and_resynced() {
        let (app, _sheets) = app_with_memory_mirror();
        let mut session = app.new_session();
        app.begin_interaction(&mut session).unwrap();
        auth::login(&app.db, &mut session, "Cajero1", "1234").unwrap();

        session.touch(Utc::now() - Duration::hours(2));
        let interaction = app.begin_interaction(&mut session).unwrap();
        assert!(interaction.timed_out);
        assert!(interaction.sync.is_some());
        assert!(!session.is_logged_in());
    }

    #[test]
    fn unconfigured_mirror_fails_soft() {
        let db = db::open_in_memory_for_test();
        let app = App::with_mirror(
            StoreConfig::default(),
            db,
            Arc::new(UnconfiguredSheets::new("no spreadsheet id configured")),
            false,
        );
        let mut session = app.new_session();
        let interaction = app.begin_interaction(&mut session).unwrap();
        let report = interaction.sync.unwrap();
        assert!(!report.success);
        assert!(report.message.contains("not configured"));
        assert!(!app.mirror_configured());
    }
}
