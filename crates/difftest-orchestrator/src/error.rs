//! Error types for the orchestrator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] difftest_store::StoreError),

    #[error(transparent)]
    Core(#[from] difftest_core::CoreError),

    #[error("failed to read config at {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
