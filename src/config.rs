//! Store configuration.
//!
//! Compiled-in defaults for a single shop, overridable through `POS_*`
//! environment variables. Secrets are not read here; see `storage`.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::path::PathBuf;
use tracing::warn;

const DEFAULT_STORE_NAME: &str = "Papelería La Esperanza";
const DEFAULT_LOCATION: &str = "Guadalajara, Jal.";
const DEFAULT_CURRENCY: &str = "$";
const DEFAULT_IDLE_TIMEOUT_SECS: i64 = 3600;
/// America/Mexico_City has been fixed at UTC-6 since 2022.
const DEFAULT_UTC_OFFSET_MINUTES: i32 = -360;
const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 5;
const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub store_name: String,
    pub location: String,
    pub currency: String,
    pub idle_timeout_secs: i64,
    pub utc_offset_minutes: i32,
    pub low_stock_threshold: i64,
    pub data_dir: PathBuf,
    pub spreadsheet_id: Option<String>,
    pub sheets_api_base: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_name: DEFAULT_STORE_NAME.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            data_dir: default_data_dir(),
            spreadsheet_id: None,
            sheets_api_base: DEFAULT_SHEETS_API_BASE.to_string(),
        }
    }
}

impl StoreConfig {
    /// Defaults overlaid with any `POS_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_str("POS_STORE_NAME") {
            cfg.store_name = v;
        }
        if let Some(v) = env_str("POS_LOCATION") {
            cfg.location = v;
        }
        if let Some(v) = env_str("POS_CURRENCY") {
            cfg.currency = v;
        }
        if let Some(v) = env_parse::<i64>("POS_IDLE_TIMEOUT_SECS") {
            cfg.idle_timeout_secs = v.max(1);
        }
        if let Some(v) = env_parse::<i32>("POS_UTC_OFFSET_MINUTES") {
            cfg.utc_offset_minutes = v;
        }
        if let Some(v) = env_parse::<i64>("POS_LOW_STOCK_THRESHOLD") {
            cfg.low_stock_threshold = v;
        }
        if let Some(v) = env_str("POS_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        cfg.spreadsheet_id = env_str("POS_SPREADSHEET_ID");
        if let Some(v) = env_str("POS_SHEETS_API_BASE") {
            cfg.sheets_api_base = v.trim_end_matches('/').to_string();
        }

        cfg
    }

    /// Store-local timezone as a fixed offset. Falls back to UTC when the
    /// configured offset is out of range.
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| {
            warn!(
                offset_minutes = self.utc_offset_minutes,
                "invalid UTC offset, using UTC"
            );
            Utc.fix()
        })
    }

    /// Store-local wall clock time formatted as `%Y-%m-%d %H:%M:%S`.
    pub fn local_timestamp(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.timezone())
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    pub fn now_local(&self) -> String {
        self.local_timestamp(Utc::now())
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_str(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable config value");
            None
        }
    }
}

/// `{XDG_DATA_HOME or ~/.local/share}/com.esperanza.pos`, or the
/// `LOCALAPPDATA` equivalent on Windows.
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("com.esperanza.pos")
}
