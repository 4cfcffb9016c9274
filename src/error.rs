use rusqlite::ErrorCode;
use thiserror::Error;

/// Rejection of a malformed pagination cursor. Pure decode failure; never
/// conflated with "no cursor supplied".
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("cursor payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Failure of a single stream tick. Transient failures are reported to the
/// client and the stream keeps ticking; fatal failures close it.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("transient store failure: {0}")]
    Transient(rusqlite::Error),
    #[error("fatal stream failure: {0}")]
    Fatal(String),
}

impl From<rusqlite::Error> for TickError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            // SQLite contention clears on a later tick; everything else
            // (schema drift, conversion failures) is a contract violation.
            rusqlite::Error::SqliteFailure(f, _)
                if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                TickError::Transient(e)
            }
            _ => TickError::Fatal(e.to_string()),
        }
    }
}

/// Failure of the query path. Surfaced to the caller with a distinct status
/// per kind; a store failure is never masked as an empty result set.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("malformed cursor: {0}")]
    BadCursor(#[from] CursorError),
    #[error("store failure: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("internal error: {0}")]
    Internal(String),
}
