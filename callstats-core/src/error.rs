//! Error types for callstats-core

use crate::types::RefreshMode;
use thiserror::Error;

/// Main error type for the callstats-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The call record source could not be read.
    ///
    /// Raised before any mutation of the summary table, so a retry is safe.
    #[error("call record source unavailable: {0}")]
    SourceUnavailable(String),

    /// Reconciliation failed and was rolled back; the summary table still
    /// holds its previous contents.
    #[error("{mode} reconciliation failed and was rolled back: {source}")]
    Reconciliation {
        mode: RefreshMode,
        #[source]
        source: rusqlite::Error,
    },

    /// Reconciliation failed after rows were removed and the rollback did not
    /// complete. The summary table may be missing rows until the same-mode
    /// refresh is re-run.
    #[error("{mode} reconciliation left the summary table degraded: {message}")]
    PartialReconciliation { mode: RefreshMode, message: String },
}

impl Error {
    /// Whether this failure may have left the summary table degraded.
    pub fn is_partial_reconciliation(&self) -> bool {
        matches!(self, Error::PartialReconciliation { .. })
    }
}

/// Result type alias for callstats-core
pub type Result<T> = std::result::Result<T, Error>;
