//! Orchestrator (C8): baseline vs. incremental state machine, and the scope
//! subset/superset comparison from `spec.md` §4.8.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use difftest_core::{ChangeDetector, ChangeReport, Fingerprint, FingerprintCache, StoredFileRow};
use difftest_store::Store;

use crate::error::Result;

const SCOPE_METADATA_KEY: &str = "scope";

/// Execution mode, per the C8 mode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Baseline,
    Incremental,
}

/// Result of [`Orchestrator::plan`].
#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub run_set: HashSet<String>,
    pub skip_set: HashSet<String>,
    pub warnings: Vec<String>,
}

/// Owns the store, the fingerprint cache, and the project root a run scans.
pub struct Orchestrator {
    store: Store,
    cache: FingerprintCache,
    project_root: PathBuf,
}

impl Orchestrator {
    pub fn new(store: Store, cache: FingerprintCache, project_root: PathBuf) -> Self {
        Self { store, cache, project_root }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// The C8 state machine. `scope` is the set of path prefixes (relative
    /// to `project_root`) this run's test collection was limited to.
    pub fn plan(
        &self,
        env_id: i64,
        collected: &HashSet<String>,
        mode: Mode,
        force: bool,
        scope: &HashSet<String>,
    ) -> Result<PlanOutcome> {
        let mut warnings = Vec::new();
        self.check_scope(scope, &mut warnings)?;

        let known = self.store.known_test_names(env_id)?;
        let store_empty = known.is_empty();

        let (run_set, skip_set) = match (mode, store_empty, force) {
            (Mode::Baseline, true, _) => {
                tracing::info!(env_id, "baseline run on an empty store: running every collected test");
                (collected.clone(), HashSet::new())
            }
            (Mode::Baseline, false, true) => {
                tracing::info!(env_id, "baseline run with --diff-force: ignoring prior data");
                (collected.clone(), HashSet::new())
            }
            (Mode::Baseline, false, false) => {
                let affected = self.affected_set(env_id, collected, &known, true)?;
                let skip: HashSet<String> = collected.difference(&affected).cloned().collect();
                (affected, skip)
            }
            (Mode::Incremental, true, _) => {
                let message = "incremental run against an empty store: running every collected test".to_string();
                tracing::warn!(env_id, "{message}");
                warnings.push(message);
                (collected.clone(), HashSet::new())
            }
            (Mode::Incremental, false, _) => {
                let affected = self.affected_set(env_id, collected, &known, false)?;
                let skip: HashSet<String> = collected.difference(&affected).cloned().collect();
                (affected, skip)
            }
        };

        Ok(PlanOutcome { run_set, skip_set, warnings })
    }

    /// C6 (via the pure detector in `difftest-core`) + C7 (`get_affected_tests`),
    /// plus the "no prior row ⇒ select" new-test rule.
    ///
    /// `mutate_store` applies the Level 1/2 bookkeeping writes (mtime
    /// refresh on unchanged-but-touched files, deletion of vanished files'
    /// rows) that the pure change-detection pass reports as needed; under
    /// incremental mode this is `false` so the store is left untouched.
    fn affected_set(
        &self,
        env_id: i64,
        collected: &HashSet<String>,
        known: &HashSet<String>,
        mutate_store: bool,
    ) -> Result<HashSet<String>> {
        let report = self.detect_changes()?;
        if mutate_store {
            self.apply_bookkeeping(&report)?;
        }

        let mut affected = self.store.get_affected_tests(env_id, &report.changed)?;
        for test_name in collected {
            if !known.contains(test_name) {
                tracing::debug!(test_name = %test_name, "new test with no prior execution row: selecting");
                affected.insert(test_name.clone());
            }
        }
        Ok(affected.into_iter().filter(|t| collected.contains(t)).collect())
    }

    /// Run the three-level Change Detector over every file the store knows
    /// about plus every file on disk under `project_root`.
    pub fn detect_changes(&self) -> Result<ChangeReport> {
        let stored_filenames = self.store.all_filenames()?;
        let mut stored: HashMap<String, Vec<StoredFileRow>> = HashMap::new();
        for filename in &stored_filenames {
            let rows = self.store.list_fingerprints_for_file(filename)?;
            stored.insert(
                filename.clone(),
                rows.into_iter()
                    .map(|r| StoredFileRow {
                        content_hash: r.content_hash,
                        mtime: r.mtime,
                        method_checksums: r.method_checksums,
                    })
                    .collect(),
            );
        }

        let present_files = scan_python_files(&self.project_root);
        let detector = ChangeDetector::new(&self.cache);
        Ok(detector.detect(&stored, &present_files)?)
    }

    fn apply_bookkeeping(&self, report: &ChangeReport) -> Result<()> {
        for (filename, mtime) in &report.refreshed_mtime {
            self.store.touch_mtime(filename, *mtime)?;
        }
        for filename in &report.deleted_files {
            self.store.delete_fingerprints_for_file(filename)?;
        }
        Ok(())
    }

    /// Fresh fingerprints a [`ChangeReport`] computed for new or Level-3
    /// files — handed to `record_result` callers so a test's dependency set
    /// can be persisted without re-parsing.
    pub fn fresh_fingerprint(&self, report: &ChangeReport, filename: &str) -> Option<Fingerprint> {
        report.fresh_fingerprints.get(filename).cloned()
    }

    fn check_scope(&self, scope: &HashSet<String>, warnings: &mut Vec<String>) -> Result<()> {
        let stored_scope = self
            .store
            .get_metadata(SCOPE_METADATA_KEY)?
            .map(|raw| raw.split(',').map(str::to_string).collect::<HashSet<_>>());

        match stored_scope {
            None => {
                self.store.set_metadata(SCOPE_METADATA_KEY, &join_scope(scope))?;
            }
            Some(stored) if scope.is_subset(&stored) => {}
            Some(_) => {
                let message =
                    "run scope is a superset of the stored scope: some collected tests may have no prior store entry".to_string();
                tracing::warn!("{message}");
                warnings.push(message);
            }
        }
        Ok(())
    }
}

fn join_scope(scope: &HashSet<String>) -> String {
    let mut sorted: Vec<&String> = scope.iter().collect();
    sorted.sort();
    sorted.into_iter().cloned().collect::<Vec<_>>().join(",")
}

/// Recursively collect every `.py` file under `root`, keyed by its
/// project-root-relative, forward-slash-normalized filename.
fn scan_python_files(root: &Path) -> HashMap<String, PathBuf> {
    let mut out = HashMap::new();
    walk(root, root, &mut out);
    out
}

fn walk(root: &Path, dir: &Path, out: &mut HashMap<String, PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out);
        } else if path.extension().is_some_and(|ext| ext == "py") {
            let filename = difftest_core::normalize_filename(root, &path);
            out.insert(filename, path);
        }
    }
}
