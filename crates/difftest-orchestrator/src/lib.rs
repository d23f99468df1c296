//! difftest-orchestrator
//!
//! The baseline/incremental state machine, its configuration, and the
//! runner-plugin facade the host test runner embeds.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod plugin;
pub mod telemetry;

pub use config::DiffConfig;
pub use error::{OrchestratorError, Result};
pub use orchestrator::{Mode, Orchestrator, PlanOutcome};
pub use plugin::{flush, init_store, init_store_with_config, plan, record_result, Handle};
pub use telemetry::init_tracing;
