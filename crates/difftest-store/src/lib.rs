//! difftest-store
//!
//! The embedded SQLite-backed half of the system: the persisted schema, the
//! Dependency Store's CRUD surface and Affected-Test Resolver query, and the
//! deterministic multi-shard merge engine.

pub mod error;
pub mod merge;
pub mod model;
pub mod schema;
pub mod store;

pub use error::{Result, StoreError};
pub use merge::merge;
pub use model::{canonicalize_packages, pack_checksums, unpack_checksums, FingerprintRow};
pub use schema::SCHEMA_VERSION;
pub use store::{PendingExecution, Store};
