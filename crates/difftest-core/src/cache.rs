//! Fingerprint Cache (C4): a bounded mapping from `(absolute_path,
//! content_hash)` to `Fingerprint`, consulted before any parse.
//!
//! Backed by a lock-free concurrent map so readers never block each other;
//! the only serialization point is a small insertion-order ledger used for
//! approximate-LRU eviction, touched only on insert.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;

use crate::fingerprint::{fingerprint_file, Fingerprint};

/// Default bound on the number of cached fingerprints.
pub const DEFAULT_CACHE_SIZE: usize = 100_000;

type CacheKey = (PathBuf, String);

/// Bounded, thread-safe cache mapping `(absolute_path, content_hash)` to the
/// `Fingerprint` computed for it.
pub struct FingerprintCache {
    bound: usize,
    entries: DashMap<CacheKey, (Fingerprint, u64)>,
    ledger: Mutex<Vec<(CacheKey, u64)>>,
    clock: AtomicU64,
}

impl FingerprintCache {
    /// Create a cache bounded at `bound` entries.
    pub fn new(bound: usize) -> Self {
        Self {
            bound: bound.max(1),
            entries: DashMap::new(),
            ledger: Mutex::new(Vec::new()),
            clock: AtomicU64::new(0),
        }
    }

    /// Return the cached fingerprint for `(absolute_path, content_hash)` if
    /// present, without touching the filesystem.
    pub fn get(&self, absolute_path: &Path, content_hash: &str) -> Option<Fingerprint> {
        let key = (absolute_path.to_path_buf(), content_hash.to_string());
        self.entries.get(&key).map(|entry| entry.0.clone())
    }

    /// Look up `(absolute_path, content_hash)`; on a miss, parse `filename`
    /// at `absolute_path` via C1+C2 and insert the result.
    pub fn get_or_compute(
        &self,
        filename: &str,
        absolute_path: &Path,
        content_hash: &str,
    ) -> crate::error::Result<Fingerprint> {
        if let Some(hit) = self.get(absolute_path, content_hash) {
            return Ok(hit);
        }
        let fingerprint = fingerprint_file(filename, absolute_path)?;
        self.insert(absolute_path, content_hash, fingerprint.clone());
        Ok(fingerprint)
    }

    fn insert(&self, absolute_path: &Path, content_hash: &str, fingerprint: Fingerprint) {
        let key = (absolute_path.to_path_buf(), content_hash.to_string());
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key.clone(), (fingerprint, tick));

        let mut ledger = self.ledger.lock().unwrap();
        ledger.push((key, tick));
        if self.entries.len() > self.bound {
            self.evict_oldest(&mut ledger);
        }
    }

    /// Evict the oldest ~10% of entries by insertion order.
    fn evict_oldest(&self, ledger: &mut Vec<(CacheKey, u64)>) {
        ledger.sort_by_key(|(_, tick)| *tick);
        let evict_count = (self.bound / 10).max(1);
        let to_evict: Vec<CacheKey> = ledger
            .iter()
            .take(evict_count)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &to_evict {
            self.entries.remove(key);
        }
        ledger.drain(0..to_evict.len());
    }

    /// Current number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn hit_skips_recompute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "def f():\n    return 1\n").unwrap();

        let cache = FingerprintCache::new(10);
        let fp1 = cache.get_or_compute("m.py", &path, "hash-a").unwrap();

        // Mutate on disk without changing the claimed content hash: a hit
        // must return the stale cached value rather than re-reading.
        fs::write(&path, "def f():\n    return 2\n").unwrap();
        let fp2 = cache.get_or_compute("m.py", &path, "hash-a").unwrap();
        assert_eq!(fp1.method_checksums, fp2.method_checksums);
    }

    #[test]
    fn different_content_hash_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "def f():\n    return 1\n").unwrap();

        let cache = FingerprintCache::new(10);
        cache.get_or_compute("m.py", &path, "hash-a").unwrap();
        assert!(cache.get(&path, "hash-b").is_none());
    }

    #[test]
    fn eviction_bounds_size() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FingerprintCache::new(10);
        for i in 0..50 {
            let path = dir.path().join(format!("m{i}.py"));
            fs::write(&path, format!("def f{i}():\n    return {i}\n")).unwrap();
            cache
                .get_or_compute(&format!("m{i}.py"), &path, &format!("hash-{i}"))
                .unwrap();
        }
        assert!(cache.len() <= 10);
    }
}
