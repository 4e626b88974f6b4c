//! File manifests: grouping ordered chunks under a file key

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use strata_cas::validation::validate_file_key;
use strata_index::{ChunkRecord, FileRecord, NewFile};

use crate::engine::ChunkEngine;
use crate::errors::Result;

/// Caller supplied description of a logical file.
///
/// The merkle root is stored and returned as-is; the engine never
/// recomputes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileManifest {
    pub file_key: String,
    pub merkle_root: String,
    pub total_size: u64,
    pub chunk_count: u32,
    pub metadata: Option<serde_json::Value>,
}

impl FileManifest {
    pub fn new(
        file_key: impl Into<String>,
        merkle_root: impl Into<String>,
        total_size: u64,
        chunk_count: u32,
    ) -> Self {
        Self {
            file_key: file_key.into(),
            merkle_root: merkle_root.into(),
            total_size,
            chunk_count,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl From<FileManifest> for NewFile {
    fn from(manifest: FileManifest) -> Self {
        NewFile {
            file_key: manifest.file_key,
            merkle_root: manifest.merkle_root,
            total_size: manifest.total_size,
            chunk_count: manifest.chunk_count,
            metadata: manifest.metadata,
        }
    }
}

impl ChunkEngine {
    /// Create or update a file manifest. Chunks may be stored before or
    /// after registration; the two are not linked transactionally.
    pub async fn register_file(&self, manifest: FileManifest) -> Result<()> {
        validate_file_key(&manifest.file_key)?;

        let (guard, backend) = self.begin_write().await?;
        let file_key = manifest.file_key.clone();
        backend.index.upsert_file(manifest.into()).await?;

        debug!(file_key = %file_key, "Registered file");
        self.notify(&backend).await;
        drop(guard);
        Ok(())
    }

    /// Chunk records for a file in `chunk_index` order, so concatenating
    /// their bytes reproduces the file. Empty for an unknown key.
    pub async fn get_file_chunks(&self, file_key: &str) -> Result<Vec<ChunkRecord>> {
        let backend = self.backend().await?;
        Ok(backend.index.chunks_for_file(file_key).await?)
    }

    /// Manifest for a file, if registered
    pub async fn get_file(&self, file_key: &str) -> Result<Option<FileRecord>> {
        let backend = self.backend().await?;
        Ok(backend.index.get_file(file_key).await?)
    }

    /// All registered manifests, newest first
    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let backend = self.backend().await?;
        Ok(backend.index.list_files().await?)
    }

    /// Remove every chunk owned by `file_key`, then the manifest itself.
    /// Returns the number of chunks removed.
    ///
    /// If removing a chunk fails, the chunks already removed stay removed,
    /// the manifest is kept, and the error is returned; calling again
    /// finishes the job.
    pub async fn delete_file(&self, file_key: &str) -> Result<usize> {
        let (guard, backend) = self.begin_write().await?;

        let chunks = backend.index.chunks_for_file(file_key).await?;
        let mut removed = 0usize;
        let mut failure = None;
        for record in &chunks {
            match backend.remove_chunk(record).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(file_key, hash = %record.hash, "Failed to remove file chunk: {}", e);
                    failure = Some(e);
                    break;
                }
            }
        }

        let result = match failure {
            Some(e) => Err(e),
            None => backend.index.delete_file_row(file_key).await.map_err(Into::into),
        };
        let file_removed = matches!(result, Ok(true));
        if removed > 0 || file_removed {
            debug!(file_key, chunks = removed, "Deleted file");
            self.notify(&backend).await;
        }
        drop(guard);

        result.map(|_| removed)
    }
}
