//! Error types shared by the local engines and the spreadsheet mirror.
//!
//! Local failures (`PosError`) propagate to the caller. Mirror failures
//! (`MirrorError`) are caught at the mirror boundary and turned into a
//! failed outcome; they never abort a local operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PosError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PosResult<T> = Result<T, PosError>;

/// Failure talking to the remote spreadsheet.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Spreadsheet mirror is not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Status(String),

    #[error("Invalid response from spreadsheet API: {0}")]
    Decode(String),

    #[error("Row not found for key {0}")]
    RowNotFound(String),

    #[error("Malformed row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },
}

pub type MirrorResult<T> = Result<T, MirrorError>;
