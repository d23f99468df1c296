//! Change Detector (C6): the three-level mtime → content-hash → block-diff
//! procedure.
//!
//! This is a pure function over two inputs the orchestrator assembles: the
//! rows the store currently holds per filename, and the files actually
//! present on disk within the run's scope. It has no direct database
//! dependency, which keeps it independently testable.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::cache::FingerprintCache;
use crate::error::Result;
use crate::fingerprint::Fingerprint;

/// The mtime-equality epsilon from §9: false positives here are safe (they
/// just cost an extra content hash), false negatives are not.
pub const MTIME_EPSILON_SECS: f64 = 0.001;

/// One previously stored fingerprint row for a filename, as the store last
/// recorded it.
#[derive(Debug, Clone)]
pub struct StoredFileRow {
    pub content_hash: String,
    pub mtime: f64,
    pub method_checksums: Vec<i32>,
}

/// Output of one change-detection pass.
#[derive(Debug, Default)]
pub struct ChangeReport {
    /// Per-file set of checksums that were added, removed, or mutated. An
    /// empty set means "touched but no block changed".
    pub changed: HashMap<String, HashSet<i32>>,
    /// Files present on disk with no prior store row.
    pub new_files: HashSet<String>,
    /// Files the store knows about that are no longer present on disk.
    pub deleted_files: HashSet<String>,
    /// Files whose content is unchanged but whose `mtime` needs refreshing
    /// in the store (Level 2 confirmed unchanged after a Level 1 suspect).
    pub refreshed_mtime: HashMap<String, f64>,
    /// Freshly computed fingerprints for files that reached Level 3 — the
    /// caller upserts these into the store.
    pub fresh_fingerprints: HashMap<String, Fingerprint>,
}

impl ChangeReport {
    /// Every filename touched by this report, in any bucket.
    pub fn touched_files(&self) -> HashSet<String> {
        let mut all: HashSet<String> = self.changed.keys().cloned().collect();
        all.extend(self.new_files.iter().cloned());
        all.extend(self.deleted_files.iter().cloned());
        all
    }
}

/// Runs the three-level change-detection procedure.
pub struct ChangeDetector<'a> {
    cache: &'a FingerprintCache,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(cache: &'a FingerprintCache) -> Self {
        Self { cache }
    }

    /// `stored` is every fingerprint row the store currently holds, keyed by
    /// filename. `present_files` is every file currently on disk within the
    /// run's scope, keyed by the same normalized filename, mapped to its
    /// absolute path.
    pub fn detect(
        &self,
        stored: &HashMap<String, Vec<StoredFileRow>>,
        present_files: &HashMap<String, PathBuf>,
    ) -> Result<ChangeReport> {
        let mut report = ChangeReport::default();

        for (filename, rows) in stored {
            match present_files.get(filename) {
                None => {
                    report.deleted_files.insert(filename.clone());
                    let union: HashSet<i32> =
                        rows.iter().flat_map(|r| r.method_checksums.iter().copied()).collect();
                    report.changed.insert(filename.clone(), union);
                }
                Some(absolute_path) => {
                    self.classify_existing(filename, rows, absolute_path, &mut report)?;
                }
            }
        }

        for (filename, absolute_path) in present_files {
            if !stored.contains_key(filename) {
                report.new_files.insert(filename.clone());
                let fingerprint = crate::fingerprint::fingerprint_file(filename, absolute_path)?;
                let checksums: HashSet<i32> = fingerprint.method_checksums.iter().copied().collect();
                report.changed.insert(filename.clone(), checksums);
                report.fresh_fingerprints.insert(filename.clone(), fingerprint);
            }
        }

        Ok(report)
    }

    fn classify_existing(
        &self,
        filename: &str,
        rows: &[StoredFileRow],
        absolute_path: &PathBuf,
        report: &mut ChangeReport,
    ) -> Result<()> {
        let metadata = match std::fs::metadata(absolute_path) {
            Ok(m) => m,
            Err(_) => {
                // Unreadable: treat as deleted for change-detection purposes.
                tracing::warn!(file = filename, "io error reading metadata, treating as deleted");
                report.deleted_files.insert(filename.to_string());
                let union: HashSet<i32> =
                    rows.iter().flat_map(|r| r.method_checksums.iter().copied()).collect();
                report.changed.insert(filename.to_string(), union);
                return Ok(());
            }
        };
        let current_mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let stored_mtime = rows.iter().map(|r| r.mtime).fold(f64::MIN, f64::max);

        // Level 1: mtime scan.
        if (current_mtime - stored_mtime).abs() <= MTIME_EPSILON_SECS {
            return Ok(());
        }

        // Level 2: content hash.
        let bytes = std::fs::read(absolute_path).map_err(|source| crate::error::CoreError::Io {
            path: absolute_path.display().to_string(),
            source,
        })?;
        let fresh_hash = {
            use sha2::{Digest, Sha256};
            hex::encode(Sha256::digest(&bytes))
        };
        let content_unchanged = rows.iter().all(|r| r.content_hash == fresh_hash);
        if content_unchanged {
            report.refreshed_mtime.insert(filename.to_string(), current_mtime);
            return Ok(());
        }

        // Level 3: block diff.
        let fresh = self
            .cache
            .get_or_compute(filename, absolute_path, &fresh_hash)?;
        let fresh_set: HashSet<i32> = fresh.method_checksums.iter().copied().collect();
        let stored_set: HashSet<i32> =
            rows.iter().flat_map(|r| r.method_checksums.iter().copied()).collect();
        let changed_checksums: HashSet<i32> = fresh_set
            .symmetric_difference(&stored_set)
            .copied()
            .collect();
        report.changed.insert(filename.to_string(), changed_checksums);
        report.fresh_fingerprints.insert(filename.to_string(), fresh);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn row_for(fp: &Fingerprint, mtime: f64) -> StoredFileRow {
        StoredFileRow {
            content_hash: fp.content_hash.clone(),
            mtime,
            method_checksums: fp.method_checksums.clone(),
        }
    }

    #[test]
    fn unchanged_file_is_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "def f():\n    return 1\n").unwrap();
        let fp = crate::fingerprint::fingerprint_file("m.py", &path).unwrap();

        let mut stored = HashMap::new();
        stored.insert("m.py".to_string(), vec![row_for(&fp, fp.mtime)]);
        let mut present = HashMap::new();
        present.insert("m.py".to_string(), path);

        let cache = FingerprintCache::new(10);
        let detector = ChangeDetector::new(&cache);
        let report = detector.detect(&stored, &present).unwrap();
        assert!(report.changed.is_empty());
        assert!(report.new_files.is_empty());
        assert!(report.deleted_files.is_empty());
    }

    #[test]
    fn touched_but_unmodified_file_refreshes_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "def f():\n    return 1\n").unwrap();
        let fp = crate::fingerprint::fingerprint_file("m.py", &path).unwrap();

        let mut stored = HashMap::new();
        stored.insert("m.py".to_string(), vec![row_for(&fp, fp.mtime - 10.0)]);
        let mut present = HashMap::new();
        present.insert("m.py".to_string(), path);

        let cache = FingerprintCache::new(10);
        let detector = ChangeDetector::new(&cache);
        let report = detector.detect(&stored, &present).unwrap();
        assert!(report.changed.is_empty());
        assert!(report.refreshed_mtime.contains_key("m.py"));
    }

    #[test]
    fn modified_function_reports_changed_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "def f():\n    return 1\n").unwrap();
        let old_fp = crate::fingerprint::fingerprint_file("m.py", &path).unwrap();

        fs::write(&path, "def f():\n    return 2\n").unwrap();

        let mut stored = HashMap::new();
        stored.insert("m.py".to_string(), vec![row_for(&old_fp, old_fp.mtime - 10.0)]);
        let mut present = HashMap::new();
        present.insert("m.py".to_string(), path);

        let cache = FingerprintCache::new(10);
        let detector = ChangeDetector::new(&cache);
        let report = detector.detect(&stored, &present).unwrap();
        assert!(report.changed.contains_key("m.py"));
        assert!(!report.changed["m.py"].is_empty());
    }

    #[test]
    fn new_file_reports_all_checksums_as_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "def f():\n    return 1\n").unwrap();

        let stored = HashMap::new();
        let mut present = HashMap::new();
        present.insert("m.py".to_string(), path);

        let cache = FingerprintCache::new(10);
        let detector = ChangeDetector::new(&cache);
        let report = detector.detect(&stored, &present).unwrap();
        assert!(report.new_files.contains("m.py"));
        assert!(!report.changed["m.py"].is_empty());
    }

    #[test]
    fn deleted_file_reports_all_stored_checksums_as_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "def f():\n    return 1\n").unwrap();
        let fp = crate::fingerprint::fingerprint_file("m.py", &path).unwrap();

        let mut stored = HashMap::new();
        stored.insert("m.py".to_string(), vec![row_for(&fp, fp.mtime)]);
        let present = HashMap::new();

        let cache = FingerprintCache::new(10);
        let detector = ChangeDetector::new(&cache);
        let report = detector.detect(&stored, &present).unwrap();
        assert!(report.deleted_files.contains("m.py"));
        assert_eq!(report.changed["m.py"].len(), fp.method_checksums.len());
    }
}
