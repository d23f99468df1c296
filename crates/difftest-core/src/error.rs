//! Error taxonomy for the fingerprinting and change-detection engine.
//!
//! Maps onto the kinds in the system's error-handling design: `ParseFailed`
//! never escapes this crate (it degrades to a `<parse_error>` pseudo-block),
//! `Io` surfaces so a caller can downgrade it to a warning and treat the file
//! as deleted.

/// Errors produced by the core fingerprinting pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("source at {path} is not valid UTF-8")]
    NotUtf8 { path: String },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
