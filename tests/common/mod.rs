#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;

use strata::cas::{ContentHash, FsyncPolicy};
use strata::store::{ChunkEngine, StorageConfig};

/// A started engine over a throwaway directory
pub struct TestStorage {
    pub engine: Arc<ChunkEngine>,
    pub temp_dir: TempDir,
}

impl TestStorage {
    pub async fn new(max_size_bytes: u64) -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let config = StorageConfig::new(temp_dir.path().join("storage"))
            .with_max_size(max_size_bytes)
            .with_fsync_policy(FsyncPolicy::Never);

        let engine = Arc::new(ChunkEngine::new(config));
        engine.start().await?;
        Ok(Self { engine, temp_dir })
    }

    pub fn config(&self) -> &StorageConfig {
        self.engine.config()
    }
}

/// Deterministic pseudo-random bytes; different seeds give different content
pub fn generate_test_data(size: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..size)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// Bytes plus their content hash
pub fn make_chunk(size: usize, seed: u64) -> (ContentHash, Vec<u8>) {
    let data = generate_test_data(size, seed);
    (ContentHash::digest(&data), data)
}
