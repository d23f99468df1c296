//! `DiffConfig`: the configuration layer the distilled spec leaves implicit
//! in "default 100 000" / "default 20".

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

fn default_cache_size() -> usize {
    difftest_core::DEFAULT_CACHE_SIZE
}

fn default_batch_size() -> usize {
    20
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".cache/diff/store.db")
}

/// Loaded from an optional `difftest.toml` in the project root; falls back
/// to these defaults when the file is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Bound on the Fingerprint Cache (C4). Default 100,000.
    pub cache_size: usize,
    /// Executions buffered before a write transaction commits. Default 20.
    pub batch_size: usize,
    /// Path to the store file, relative to `project_root` if not absolute.
    pub store_path: PathBuf,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            batch_size: default_batch_size(),
            store_path: default_store_path(),
        }
    }
}

impl DiffConfig {
    /// Load `<project_root>/difftest.toml` if present, else defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join("difftest.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&config_path).map_err(|source| OrchestratorError::ConfigRead {
            path: config_path.display().to_string(),
            source,
        })?;
        let config: DiffConfig = toml::from_str(&raw).map_err(|source| OrchestratorError::ConfigParse {
            path: config_path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    /// Resolve the store path against `project_root` if it is relative.
    pub fn resolved_store_path(&self, project_root: &Path) -> PathBuf {
        if self.store_path.is_absolute() {
            self.store_path.clone()
        } else {
            project_root.join(&self.store_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = DiffConfig::default();
        assert_eq!(config.cache_size, 100_000);
        assert_eq!(config.batch_size, 20);
    }

    #[test]
    fn load_falls_back_to_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = DiffConfig::load(dir.path()).unwrap();
        assert_eq!(config.batch_size, 20);
    }

    #[test]
    fn load_parses_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("difftest.toml"), "batch_size = 50\n").unwrap();
        let config = DiffConfig::load(dir.path()).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.cache_size, 100_000);
    }
}
