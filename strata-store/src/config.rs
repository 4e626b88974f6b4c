use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use strata_cas::{FsyncPolicy, CHUNKS_DIR};
use strata_index::INDEX_FILE_NAME;

use crate::errors::Result;

/// Default capacity budget (10 GiB)
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Default number of LRU candidates fetched per eviction round
pub const DEFAULT_EVICTION_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `chunks/` and `index.db`
    pub storage_path: PathBuf,
    /// Upper bound on the summed size of all stored chunks
    pub max_size_bytes: u64,
    /// LRU candidates fetched per eviction round
    pub eviction_batch_size: usize,
    pub fsync_policy: FsyncPolicy,
    /// Reconcile disk and catalog during `start()`
    pub repair_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("storage"),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            eviction_batch_size: DEFAULT_EVICTION_BATCH_SIZE,
            fsync_policy: FsyncPolicy::Always,
            repair_on_start: false,
        }
    }
}

impl StorageConfig {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Self::default()
        }
    }

    pub fn with_max_size(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_fsync_policy(mut self, fsync_policy: FsyncPolicy) -> Self {
        self.fsync_policy = fsync_policy;
        self
    }

    pub fn with_eviction_batch_size(mut self, batch_size: usize) -> Self {
        self.eviction_batch_size = batch_size;
        self
    }

    pub fn with_repair_on_start(mut self, enabled: bool) -> Self {
        self.repair_on_start = enabled;
        self
    }

    /// Root of the sharded chunk tree
    pub fn chunks_dir(&self) -> PathBuf {
        self.storage_path.join(CHUNKS_DIR)
    }

    /// Location of the SQLite catalog
    pub fn index_path(&self) -> PathBuf {
        self.storage_path.join(INDEX_FILE_NAME)
    }

    /// Load a TOML config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Write this config as TOML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
