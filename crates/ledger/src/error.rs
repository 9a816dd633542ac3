use thiserror::Error;

/// Errors from journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal record not found: {0}")]
    NotFound(i64),

    #[error("cannot requeue record {0}: current status is not `failed`")]
    NotFailed(i64),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type JournalResult<T> = Result<T, JournalError>;
