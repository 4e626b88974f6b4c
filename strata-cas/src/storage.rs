use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::errors::{CasError, Result};
use crate::hash::ContentHash;

/// Directory under the storage root holding the sharded chunk files
pub const CHUNKS_DIR: &str = "chunks";

const TEMP_SUFFIX: &str = ".tmp";

/// Fsync policy for controlling write durability vs performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsyncPolicy {
    /// Fsync the chunk file and its shard directory on every write
    #[default]
    Always,
    /// Leave flushing to the OS (tests, scratch nodes)
    Never,
}

/// Statistics from startup recovery.
#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    /// Number of leftover temporary files removed
    pub cleaned: usize,
    /// Errors encountered during recovery
    pub errors: Vec<String>,
}

/// Sharded on-disk chunk storage.
///
/// Chunks are stored at `{root}/chunks/{h[0..2]}/{h[2..4]}/{hash}` so that no
/// single directory grows past a small fraction of the total chunk count.
/// The store only moves bytes; it keeps no record of what it holds beyond
/// the directory tree itself.
///
/// # Example
///
/// ```rust,no_run
/// use strata_cas::{ChunkStore, ContentHash, FsyncPolicy};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = ChunkStore::open("/tmp/strata", FsyncPolicy::Always).await?;
///
/// let data = b"Hello, World!";
/// let hash = ContentHash::digest(data);
/// store.write(&hash, data).await?;
///
/// let retrieved = store.read(&hash).await?;
/// assert_eq!(retrieved.as_deref(), Some(&data[..]));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChunkStore {
    root_path: PathBuf,
    fsync_policy: FsyncPolicy,
}

impl ChunkStore {
    /// Open a chunk store rooted at `root_path`, creating `chunks/` if
    /// needed and cleaning up interrupted writes.
    pub async fn open(root_path: impl AsRef<Path>, fsync_policy: FsyncPolicy) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        fs::create_dir_all(root_path.join(CHUNKS_DIR)).await?;

        let store = Self {
            root_path,
            fsync_policy,
        };

        let stats = store.recover().await?;
        if stats.cleaned > 0 || !stats.errors.is_empty() {
            debug!(
                cleaned = stats.cleaned,
                errors = stats.errors.len(),
                "Chunk store recovery completed"
            );
        }

        debug!("Chunk store opened at {:?}", store.root_path);
        Ok(store)
    }

    /// Root directory this store was opened on
    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Get the sharded path for a chunk
    pub fn chunk_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        let (shard1, rest) = hex.split_at(2);
        let (shard2, _) = rest.split_at(2);

        self.root_path
            .join(CHUNKS_DIR)
            .join(shard1)
            .join(shard2)
            .join(&hex)
    }

    /// Write a chunk, replacing any existing file at the same path.
    ///
    /// The bytes land in a temporary sibling first and are renamed into
    /// place, so a reader never observes a partially written chunk.
    pub async fn write(&self, hash: &ContentHash, data: &[u8]) -> Result<()> {
        let chunk_path = self.chunk_path(hash);
        let shard_dir = chunk_path
            .parent()
            .ok_or_else(|| CasError::StoragePath("Invalid chunk path".to_string()))?;

        fs::create_dir_all(shard_dir).await?;
        self.write_atomic(shard_dir, &chunk_path, data).await?;

        debug!("Wrote chunk {} ({} bytes)", hash, data.len());
        Ok(())
    }

    /// Read a chunk's raw bytes; `None` if no file exists for `hash`.
    pub async fn read(&self, hash: &ContentHash) -> Result<Option<Bytes>> {
        match fs::read(self.chunk_path(hash)).await {
            Ok(data) => {
                trace!("Read chunk {} ({} bytes)", hash, data.len());
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a chunk and check that its bytes still hash to `hash`.
    pub async fn read_verified(&self, hash: &ContentHash) -> Result<Option<Bytes>> {
        let Some(data) = self.read(hash).await? else {
            return Ok(None);
        };

        let actual = ContentHash::digest(&data);
        if actual != *hash {
            return Err(CasError::HashMismatch {
                expected: *hash,
                actual,
            });
        }

        Ok(Some(data))
    }

    /// Check if a chunk file exists without reading it
    pub async fn exists(&self, hash: &ContentHash) -> Result<bool> {
        Ok(fs::try_exists(self.chunk_path(hash)).await?)
    }

    /// Delete a chunk file. Returns whether a file was removed; a missing
    /// file is not an error.
    pub async fn delete(&self, hash: &ContentHash) -> Result<bool> {
        match fs::remove_file(self.chunk_path(hash)).await {
            Ok(()) => {
                debug!("Deleted chunk {}", hash);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate every chunk file as `(hash, size)`.
    ///
    /// Walks the whole shard tree, so cost grows with the number of stored
    /// chunks. Entries whose name is not a valid hash are skipped.
    pub async fn list_chunks(&self) -> Result<Vec<(ContentHash, u64)>> {
        let chunks_dir = self.root_path.join(CHUNKS_DIR);
        let mut found = Vec::new();

        for shard1 in read_subdirs(&chunks_dir).await? {
            for shard2 in read_subdirs(&shard1).await? {
                let mut entries = fs::read_dir(&shard2).await?;
                while let Some(entry) = entries.next_entry().await? {
                    if !entry.file_type().await?.is_file() {
                        continue;
                    }
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    match ContentHash::from_hex(&name) {
                        Ok(hash) => found.push((hash, entry.metadata().await?.len())),
                        Err(_) => trace!("Skipping non-chunk entry {:?}", entry.path()),
                    }
                }
            }
        }

        Ok(found)
    }

    /// Remove temporary files left behind by interrupted writes.
    ///
    /// A temp file never had a catalog row written for it, so it is always
    /// discarded rather than promoted.
    pub async fn recover(&self) -> Result<RecoveryStats> {
        let mut stats = RecoveryStats::default();
        let mut stack = vec![self.root_path.join(CHUNKS_DIR)];

        while let Some(current_dir) = stack.pop() {
            let mut dir_entries = match fs::read_dir(&current_dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    stats
                        .errors
                        .push(format!("Failed to read directory {:?}: {}", current_dir, e));
                    continue;
                }
            };

            loop {
                let entry = match dir_entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        stats.errors.push(format!("Failed to read directory entry: {}", e));
                        break;
                    }
                };
                let path = entry.path();

                if entry.file_type().await.map(|ft| ft.is_dir()).unwrap_or(false) {
                    stack.push(path);
                } else if path.to_string_lossy().ends_with(TEMP_SUFFIX) {
                    match fs::remove_file(&path).await {
                        Ok(()) => {
                            stats.cleaned += 1;
                            trace!("Removed interrupted write {:?}", path);
                        }
                        Err(e) => {
                            warn!("Failed to remove temp file {:?}: {}", path, e);
                            stats.errors.push(format!("{:?}: {}", path, e));
                        }
                    }
                }
            }
        }

        Ok(stats)
    }

    async fn write_atomic(&self, shard_dir: &Path, final_path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = {
            let mut temp_name = final_path
                .file_name()
                .ok_or_else(|| CasError::StoragePath("Invalid chunk filename".to_string()))?
                .to_os_string();
            temp_name.push(TEMP_SUFFIX);
            shard_dir.join(temp_name)
        };

        {
            let mut file = File::create(&temp_path).await.map_err(|e| {
                CasError::AtomicWriteFailed(format!("Failed to create temp file: {}", e))
            })?;

            if let Err(e) = file.write_all(data).await {
                drop(file);
                let _ = fs::remove_file(&temp_path).await;
                return Err(CasError::AtomicWriteFailed(format!(
                    "Failed to write data: {}",
                    e
                )));
            }

            if self.fsync_policy == FsyncPolicy::Always {
                file.sync_all().await.map_err(|e| {
                    CasError::AtomicWriteFailed(format!("Failed to sync temp file: {}", e))
                })?;
            }
        }

        if let Err(e) = fs::rename(&temp_path, final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(CasError::AtomicWriteFailed(format!(
                "Failed to rename temp file: {}",
                e
            )));
        }

        if self.fsync_policy == FsyncPolicy::Always {
            // Make the rename durable
            File::open(shard_dir).await?.sync_all().await.map_err(|e| {
                CasError::AtomicWriteFailed(format!("Failed to sync directory: {}", e))
            })?;
        }

        Ok(())
    }
}

async fn read_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }

    Ok(dirs)
}
