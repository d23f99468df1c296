//! The runner-plugin facade from `spec.md` §6.2: `init_store`, `plan`,
//! `record_result`, `flush`. This is the surface the host test runner
//! embeds; everything else in this crate is implementation detail.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use difftest_core::FingerprintCache;
use difftest_store::{PendingExecution, Store};

use crate::config::DiffConfig;
use crate::error::Result;
use crate::orchestrator::{Mode, Orchestrator, PlanOutcome};

/// Opaque handle the host holds across a run. Wraps the orchestrator plus
/// the batching buffer `record_result` fills and `flush` drains.
pub struct Handle {
    orchestrator: Orchestrator,
    env_id: i64,
    batch_size: usize,
    pending: Vec<OwnedExecution>,
}

struct OwnedExecution {
    test_name: String,
    duration: Option<f64>,
    failed: bool,
    forced: bool,
    fingerprints: Vec<difftest_core::Fingerprint>,
}

/// `init_store(path, cache_size) → handle`.
pub fn init_store(
    project_root: &Path,
    store_path: &Path,
    cache_size: usize,
    environment_name: &str,
    system_packages: &str,
    python_version: &str,
) -> Result<Handle> {
    let store = Store::open(store_path)?;
    let env_id = store.get_or_create_environment(environment_name, system_packages, python_version)?;
    let cache = FingerprintCache::new(cache_size);
    let orchestrator = Orchestrator::new(store, cache, project_root.to_path_buf());
    Ok(Handle {
        orchestrator,
        env_id,
        batch_size: 20,
        pending: Vec::new(),
    })
}

/// Convenience constructor that reads `<project_root>/difftest.toml`.
pub fn init_store_with_config(
    project_root: &Path,
    environment_name: &str,
    system_packages: &str,
    python_version: &str,
) -> Result<Handle> {
    let config = DiffConfig::load(project_root)?;
    let store_path = config.resolved_store_path(project_root);
    let mut handle = init_store(
        project_root,
        &store_path,
        config.cache_size,
        environment_name,
        system_packages,
        python_version,
    )?;
    handle.batch_size = config.batch_size;
    Ok(handle)
}

/// `plan(handle, env, collected_test_names, mode, scope) → (run_set, skip_set, warnings)`.
pub fn plan(
    handle: &Handle,
    collected_test_names: &HashSet<String>,
    mode: Mode,
    force: bool,
    scope: &HashSet<String>,
) -> Result<PlanOutcome> {
    handle.orchestrator.plan(handle.env_id, collected_test_names, mode, force, scope)
}

/// `record_result(handle, env, test_name, duration, failed, forced, touched_files)`.
///
/// `touched_files` maps project-root-relative filenames to the 1-based
/// lines the host's coverage mechanism says this test touched. Lines are
/// resolved to owning blocks via the current fingerprint for diagnostics;
/// the persisted edge remains file-granular.
pub fn record_result(
    handle: &mut Handle,
    test_name: &str,
    duration: Option<f64>,
    failed: bool,
    forced: bool,
    touched_files: &std::collections::HashMap<String, Vec<usize>>,
) -> Result<()> {
    let mut fingerprints = Vec::with_capacity(touched_files.len());
    for (filename, lines) in touched_files {
        let absolute = handle.orchestrator.project_root().join(filename);
        let content_hash = difftest_core::content_hash_of_file(&absolute)?;
        let fingerprint = handle
            .orchestrator
            .cache()
            .get_or_compute(filename, &absolute, &content_hash)?;
        for &line in lines {
            match fingerprint.block_for_line(line) {
                Some(block) => tracing::debug!(test_name, filename, line, block, "line resolved to block"),
                None => tracing::debug!(test_name, filename, line, "line did not resolve to any block"),
            }
        }
        fingerprints.push(fingerprint);
    }

    handle.pending.push(OwnedExecution {
        test_name: test_name.to_string(),
        duration,
        failed,
        forced,
        fingerprints,
    });

    if handle.pending.len() >= handle.batch_size {
        commit_pending(handle)?;
    }
    Ok(())
}

/// `flush(handle)`: commit pending batch.
pub fn flush(handle: &mut Handle) -> Result<()> {
    commit_pending(handle)
}

fn commit_pending(handle: &mut Handle) -> Result<()> {
    if handle.pending.is_empty() {
        return Ok(());
    }
    let batch: Vec<PendingExecution<'_>> = handle
        .pending
        .iter()
        .map(|item| PendingExecution {
            test_name: item.test_name.clone(),
            duration: item.duration,
            failed: item.failed,
            forced: item.forced,
            fingerprints: &item.fingerprints,
        })
        .collect();
    handle.orchestrator.store().save_test_executions_batch(handle.env_id, &batch)?;
    handle.pending.clear();
    Ok(())
}

impl Handle {
    pub fn store_path(&self) -> PathBuf {
        self.orchestrator.store().path().to_path_buf()
    }
}
