//! Reconciliation of the chunk tree against the catalog

use std::collections::HashMap;
use tracing::{error, info, warn};

use strata_cas::CasError;

use crate::engine::{Backend, ChunkEngine};
use crate::errors::Result;

/// What a repair pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Chunk files on disk with no catalog row
    pub orphan_files_removed: usize,
    /// Catalog rows whose chunk file is gone
    pub missing_rows_removed: usize,
    /// Chunks whose bytes no longer hash to their name
    pub corrupt_chunks_removed: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Make disk and catalog agree: every chunk file has a row, every row has
/// a file, and every file hashes to its name. Reads every stored byte.
pub(crate) async fn reconcile(backend: &Backend) -> Result<RepairReport> {
    let mut report = RepairReport::default();
    let mut indexed: HashMap<String, u64> = backend.index.all_chunk_hashes().await?.into_iter().collect();

    for (hash, _) in backend.chunks.list_chunks().await? {
        let hex = hash.to_hex();
        if indexed.remove(&hex).is_none() {
            warn!(hash = %hash, "Removing orphan chunk file");
            backend.chunks.delete(&hash).await?;
            report.orphan_files_removed += 1;
            continue;
        }

        match backend.chunks.read_verified(&hash).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                backend.index.delete_chunk_row(&hex).await?;
                report.missing_rows_removed += 1;
            }
            Err(CasError::HashMismatch { actual, .. }) => {
                error!(hash = %hash, actual = %actual, "Removing corrupt chunk");
                backend.index.delete_chunk_row(&hex).await?;
                backend.chunks.delete(&hash).await?;
                report.corrupt_chunks_removed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    for hex in indexed.into_keys() {
        warn!(hash = %hex, "Removing catalog row without chunk file");
        backend.index.delete_chunk_row(&hex).await?;
        report.missing_rows_removed += 1;
    }

    if !report.is_clean() {
        info!(?report, "Storage repair complete");
    }
    Ok(report)
}

impl ChunkEngine {
    /// Reconcile the chunk tree with the catalog. See [`RepairReport`].
    pub async fn repair(&self) -> Result<RepairReport> {
        let (guard, backend) = self.begin_write().await?;
        let report = reconcile(&backend).await?;

        if !report.is_clean() {
            self.notify(&backend).await;
        }
        drop(guard);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use strata_cas::{ContentHash, FsyncPolicy};
    use strata_index::NewChunk;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_repair_reconciles_disk_and_catalog() {
        let temp_dir = tempdir().unwrap();
        let engine = ChunkEngine::new(
            StorageConfig::new(temp_dir.path()).with_fsync_policy(FsyncPolicy::Never),
        );
        engine.start().await.unwrap();

        let healthy = b"healthy".to_vec();
        let healthy_hash = ContentHash::digest(&healthy);
        engine.put_chunk(&healthy_hash, &healthy, "f", 0).await.unwrap();

        let corrupt = b"will be corrupted".to_vec();
        let corrupt_hash = ContentHash::digest(&corrupt);
        engine.put_chunk(&corrupt_hash, &corrupt, "f", 1).await.unwrap();

        let backend = engine.backend().await.unwrap();

        // File with no row
        let orphan = b"orphan".to_vec();
        let orphan_hash = ContentHash::digest(&orphan);
        backend.chunks.write(&orphan_hash, &orphan).await.unwrap();

        // Row with no file
        let ghost_hash = ContentHash::digest(b"ghost");
        backend
            .index
            .upsert_chunk(NewChunk {
                hash: ghost_hash.to_hex(),
                size: 5,
                file_key: "f".to_string(),
                chunk_index: 2,
            })
            .await
            .unwrap();

        std::fs::write(backend.chunks.chunk_path(&corrupt_hash), b"bit rot").unwrap();

        let report = engine.repair().await.unwrap();
        assert_eq!(
            report,
            RepairReport {
                orphan_files_removed: 1,
                missing_rows_removed: 1,
                corrupt_chunks_removed: 1,
            }
        );

        assert!(engine.has_chunk(&healthy_hash).await.unwrap());
        assert!(!engine.has_chunk(&orphan_hash).await.unwrap());
        assert!(!engine.has_chunk(&corrupt_hash).await.unwrap());
        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.total_size_bytes, healthy.len() as u64);

        assert!(engine.repair().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_repair_on_start() {
        let temp_dir = tempdir().unwrap();
        let config = StorageConfig::new(temp_dir.path()).with_fsync_policy(FsyncPolicy::Never);

        {
            let engine = ChunkEngine::new(config.clone());
            engine.start().await.unwrap();
            let backend = engine.backend().await.unwrap();
            let orphan = b"left behind by a crash".to_vec();
            backend
                .chunks
                .write(&ContentHash::digest(&orphan), &orphan)
                .await
                .unwrap();
            engine.stop().await.unwrap();
        }

        let engine = ChunkEngine::new(config.with_repair_on_start(true));
        engine.start().await.unwrap();
        let backend = engine.backend().await.unwrap();
        assert!(backend.chunks.list_chunks().await.unwrap().is_empty());
    }
}
