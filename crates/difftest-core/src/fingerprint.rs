//! File Fingerprinter (C3): combines the Block Extractor and Checksum Engine
//! to produce a per-file `Fingerprint`, and exposes a parallel batch form.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::block::{extract_blocks, Block};
use crate::error::{CoreError, Result};

/// The per-file record used for change detection.
///
/// Identity is `(filename, content_hash, method_checksums)`: two files with
/// identical bytes share a `content_hash` but still produce independent
/// `Fingerprint`s if their paths differ.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fingerprint {
    /// Path relative to the project root, forward-slash normalized.
    pub filename: String,
    /// SHA-256 hex digest of the raw file bytes.
    pub content_hash: String,
    /// Seconds since epoch, from `stat`.
    pub mtime: f64,
    /// One checksum per block, in source order, including `<module>`.
    pub method_checksums: Vec<i32>,
    /// The blocks the checksums were derived from (not persisted verbatim —
    /// used for line-to-block resolution while the fingerprint is hot).
    pub blocks: Vec<Block>,
}

impl Fingerprint {
    /// Resolve a 1-based source line to the name of the block that owns it,
    /// via binary search over block ranges. Ties (a line inside both an
    /// outer and nested block) resolve to the most deeply nested block,
    /// since nested blocks are emitted after their enclosing block and this
    /// picks the last match.
    pub fn block_for_line(&self, line: usize) -> Option<&str> {
        self.blocks
            .iter()
            .filter(|b| line >= b.start_line && line <= b.end_line)
            .max_by_key(|b| b.depth)
            .map(|b| b.name.as_str())
    }
}

/// SHA-256 hex digest of `absolute_path`'s bytes — the cache key a caller
/// needs before deciding whether [`fingerprint_file`] must actually run, per
/// the Fingerprint Cache's "consulted before any parse" contract.
pub fn content_hash_of_file(absolute_path: &Path) -> Result<String> {
    let bytes = fs::read(absolute_path).map_err(|source| CoreError::Io {
        path: absolute_path.display().to_string(),
        source,
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Compute the fingerprint of a single file.
///
/// `filename` is the path to record (already relative to the project root,
/// forward-slash normalized); `absolute_path` is where to actually read the
/// file and `stat` its mtime from.
pub fn fingerprint_file(filename: &str, absolute_path: &Path) -> Result<Fingerprint> {
    let bytes = fs::read(absolute_path).map_err(|source| CoreError::Io {
        path: absolute_path.display().to_string(),
        source,
    })?;
    let metadata = fs::metadata(absolute_path).map_err(|source| CoreError::Io {
        path: absolute_path.display().to_string(),
        source,
    })?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    let content_hash = hex::encode(Sha256::digest(&bytes));
    let source = String::from_utf8(bytes).map_err(|_| CoreError::NotUtf8 {
        path: absolute_path.display().to_string(),
    })?;

    let blocks = extract_blocks(&source, filename);
    let method_checksums = blocks.iter().map(Block::checksum).collect();

    Ok(Fingerprint {
        filename: filename.to_string(),
        content_hash,
        mtime,
        method_checksums,
        blocks,
    })
}

/// Fingerprint a batch of files in parallel using a work-stealing pool,
/// preserving input order in the output. `(relative_filename,
/// absolute_path)` pairs in, `Result<Fingerprint>` per input out.
pub fn fingerprint_files(paths: &[(String, PathBuf)]) -> Vec<Result<Fingerprint>> {
    use rayon::prelude::*;
    paths
        .par_iter()
        .map(|(filename, abs)| fingerprint_file(filename, abs))
        .collect()
}

/// Normalize a path to the forward-slash-separated, project-root-relative
/// form stored as `Fingerprint::filename`.
pub fn normalize_filename(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
