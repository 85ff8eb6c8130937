use crate::types::{Cents, UnixTs};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Margin guardrail: {reason} (window {window_start}..{window_end})")]
    MarginGuardrail {
        window_start: UnixTs,
        window_end: UnixTs,
        reason: String,
    },

    #[error(
        "Partial commit for window {window_start}..{window_end}: {reason}; \
         {orphaned_cents} cents of ledger rows need operator repair"
    )]
    PartialCommit {
        window_start: UnixTs,
        window_end: UnixTs,
        reason: String,
        orphaned_cents: Cents,
    },

    #[error("Window allocation already in progress for {0}")]
    WindowLocked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether a retry at the operator entrypoint can plausibly succeed.
    /// Busy/locked/IO conditions qualify; everything else is fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::TransientStorage(_) => true,
            CoreError::Database(e) => matches!(
                sqlite_code(e),
                Some(
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::SystemIoFailure
                )
            ),
            _ => false,
        }
    }

    /// Missing tables or columns mean the store was not migrated (or the
    /// schema drifted). Fatal: abort the run, no writes.
    pub fn is_schema(&self) -> bool {
        match self {
            CoreError::Schema(_) => true,
            CoreError::Database(rusqlite::Error::SqliteFailure(_, Some(msg))) => {
                msg.starts_with("no such table") || msg.starts_with("no such column")
            }
            _ => false,
        }
    }
}

fn sqlite_code(e: &rusqlite::Error) -> Option<rusqlite::ErrorCode> {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => Some(err.code),
        _ => None,
    }
}
