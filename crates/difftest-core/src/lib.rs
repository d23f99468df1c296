//! difftest-core
//!
//! The pure, store-independent half of block-level test-impact analysis:
//! parsing source into blocks, checksumming them, fingerprinting whole files,
//! caching those fingerprints, and detecting what changed between two runs.
//! Nothing in this crate touches a database or a test runner.

pub mod block;
pub mod cache;
pub mod change_detector;
pub mod checksum;
pub mod error;
pub mod fingerprint;

pub use block::{extract_blocks, Block, MODULE_BLOCK, PARSE_ERROR_BLOCK};
pub use cache::{FingerprintCache, DEFAULT_CACHE_SIZE};
pub use change_detector::{ChangeDetector, ChangeReport, StoredFileRow, MTIME_EPSILON_SECS};
pub use checksum::block_checksum;
pub use error::{CoreError, Result};
pub use fingerprint::{
    content_hash_of_file, fingerprint_file, fingerprint_files, normalize_filename, Fingerprint,
};
