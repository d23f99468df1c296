//! Error types for the dependency store.

use thiserror::Error;

/// Errors the store surfaces. `StoreCorrupt` and `ContentionExceeded` are
/// fatal (per §7: data-integrity risk); everything else is recoverable by
/// the caller re-running the operation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store at {path} is corrupt or has an incompatible schema: {detail}")]
    StoreCorrupt { path: String, detail: String },

    #[error("busy timeout elapsed waiting for a write lock on {path}")]
    ContentionExceeded { path: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o error opening store at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum blob for fingerprint {id} has length {len}, not a multiple of 4")]
    MalformedChecksumBlob { id: i64, len: usize },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// `SQLITE_BUSY`/`SQLITE_LOCKED` surfaced after the busy timeout elapses.
    pub fn from_sqlite_contention(path: &str, err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::ContentionExceeded { path: path.to_string() }
            }
            _ => StoreError::Sqlite(err),
        }
    }
}
