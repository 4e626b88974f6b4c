use bytes::Bytes;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, trace, warn};

use strata_cas::validation::validate_file_key;
use strata_cas::{CasError, ChunkStore, ContentHash};
use strata_index::{ChunkRecord, MetadataIndex, NewChunk};

use crate::config::StorageConfig;
use crate::errors::{Result, StoreError};
use crate::eviction::EvictionManager;
use crate::repair;
use crate::stats::{ChangeNotifier, StorageStats, Subscription};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Open chunk directory and catalog. Exists only while the engine runs.
pub(crate) struct Backend {
    pub(crate) chunks: ChunkStore,
    pub(crate) index: MetadataIndex,
}

impl Backend {
    pub(crate) async fn open(config: &StorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.storage_path).await?;
        let chunks = ChunkStore::open(&config.storage_path, config.fsync_policy).await?;
        let index = MetadataIndex::open(config.index_path()).await?;
        Ok(Self { chunks, index })
    }

    /// Remove an indexed chunk, row first. If the file cannot be removed
    /// the row is put back so the pair stays consistent.
    pub(crate) async fn remove_chunk(&self, record: &ChunkRecord) -> Result<()> {
        self.index.delete_chunk_row(&record.hash).await?;

        let hash = match ContentHash::from_hex(&record.hash) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(hash = %record.hash, "Dropped catalog row with malformed hash: {}", e);
                return Ok(());
            }
        };

        if let Err(e) = self.chunks.delete(&hash).await {
            if let Err(restore_err) = self.index.restore_chunk(record.clone()).await {
                error!(
                    hash = %record.hash,
                    "Chunk file kept but its row could not be restored: {}", restore_err
                );
            }
            return Err(e.into());
        }

        Ok(())
    }

    pub(crate) async fn stats(&self, max_size_bytes: u64) -> Result<StorageStats> {
        Ok(StorageStats::new(
            self.index.chunk_count().await?,
            self.index.total_size().await?,
            max_size_bytes,
            self.index.file_count().await?,
        ))
    }
}

/// Content-addressed chunk storage with a bounded capacity.
///
/// One engine owns one storage directory. Mutations are serialized through
/// an internal lock, so the check-capacity, evict, write sequence of
/// [`put_chunk`](Self::put_chunk) cannot be interleaved by another caller.
/// Reads run concurrently with each other and with mutations.
///
/// # Example
///
/// ```rust,no_run
/// use strata_store::{ChunkEngine, ContentHash, StorageConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = ChunkEngine::new(StorageConfig::new("/var/lib/strata").with_max_size(1 << 30));
/// engine.start().await?;
///
/// let data = b"chunk bytes";
/// let hash = ContentHash::digest(data);
/// engine.put_chunk(&hash, data, "file-1", 0).await?;
/// assert_eq!(engine.get_chunk(&hash).await?.as_deref(), Some(&data[..]));
///
/// engine.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct ChunkEngine {
    config: StorageConfig,
    backend: RwLock<Option<Arc<Backend>>>,
    write_lock: Mutex<()>,
    eviction: EvictionManager,
    notifier: ChangeNotifier,
}

impl ChunkEngine {
    /// Create a stopped engine. Nothing touches disk until [`start`](Self::start).
    pub fn new(config: StorageConfig) -> Self {
        let eviction = EvictionManager::new(config.eviction_batch_size);
        Self {
            config,
            backend: RwLock::new(None),
            write_lock: Mutex::new(()),
            eviction,
            notifier: ChangeNotifier::new(EVENT_CHANNEL_CAPACITY),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Create the storage layout and open the catalog.
    ///
    /// Any failure leaves the engine stopped. Starting a running engine is
    /// a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.backend.write().await;
        if slot.is_some() {
            debug!("Storage engine already running");
            return Ok(());
        }

        let backend = Backend::open(&self.config).await?;

        if self.config.repair_on_start {
            let report = repair::reconcile(&backend).await?;
            if !report.is_clean() {
                info!(?report, "Repaired storage on start");
            }
        }

        let stats = backend.stats(self.config.max_size_bytes).await?;
        *slot = Some(Arc::new(backend));

        info!(
            path = ?self.config.storage_path,
            chunks = stats.total_chunks,
            bytes = stats.total_size_bytes,
            max_bytes = self.config.max_size_bytes,
            files = stats.total_files,
            "Storage engine started"
        );
        Ok(())
    }

    /// Wait for in-flight mutations, then close the catalog.
    pub async fn stop(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let backend = self.backend.write().await.take();

        if let Some(backend) = backend {
            backend.index.checkpoint().await?;
            info!(path = ?self.config.storage_path, "Storage engine stopped");
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.backend.read().await.is_some()
    }

    pub(crate) async fn backend(&self) -> Result<Arc<Backend>> {
        self.backend.read().await.clone().ok_or(StoreError::NotRunning)
    }

    /// Take the write lock, then check the engine is still running. A
    /// mutation therefore runs entirely before or entirely after `stop()`.
    pub(crate) async fn begin_write(&self) -> Result<(MutexGuard<'_, ()>, Arc<Backend>)> {
        let guard = self.write_lock.lock().await;
        let backend = self.backend().await?;
        Ok((guard, backend))
    }

    /// Store a chunk after verifying that `data` hashes to `hash`.
    ///
    /// If the chunk would push the total over capacity, least recently
    /// accessed chunks are evicted first. Storing an already indexed chunk
    /// again is idempotent.
    ///
    /// # Errors
    ///
    /// - `IntegrityMismatch` if `data` does not hash to `hash`; nothing is written
    /// - `ChunkTooLarge` if `data` alone exceeds the capacity
    /// - `CapacityExceeded` if eviction could not free enough space; chunks
    ///   evicted during the attempt are not restored
    pub async fn put_chunk(
        &self,
        hash: &ContentHash,
        data: &[u8],
        file_key: &str,
        chunk_index: u32,
    ) -> Result<()> {
        validate_file_key(file_key)?;

        let actual = ContentHash::digest(data);
        if actual != *hash {
            warn!(claimed = %hash, actual = %actual, "Rejected chunk with mismatched hash");
            return Err(StoreError::IntegrityMismatch {
                expected: *hash,
                actual,
            });
        }

        let size = data.len() as u64;
        if size > self.config.max_size_bytes {
            return Err(StoreError::ChunkTooLarge {
                size,
                max: self.config.max_size_bytes,
            });
        }

        let (guard, backend) = self.begin_write().await?;
        let mut changed = false;
        let result = self
            .put_locked(&backend, hash, data, file_key, chunk_index, &mut changed)
            .await;

        if changed {
            self.notify(&backend).await;
        }
        drop(guard);
        result
    }

    async fn put_locked(
        &self,
        backend: &Backend,
        hash: &ContentHash,
        data: &[u8],
        file_key: &str,
        chunk_index: u32,
        changed: &mut bool,
    ) -> Result<()> {
        let hex = hash.to_hex();
        let size = data.len() as u64;
        let already_indexed = backend.index.get_chunk(&hex).await?.is_some();

        if !already_indexed {
            let used = backend.index.total_size().await?;
            let projected = used + size;
            if projected > self.config.max_size_bytes {
                let needed = projected - self.config.max_size_bytes;
                let report = self.eviction.free_space(backend, needed).await?;
                if !report.evicted.is_empty() {
                    *changed = true;
                }
                if report.freed_bytes < needed {
                    return Err(StoreError::CapacityExceeded {
                        needed,
                        freed: report.freed_bytes,
                    });
                }
            }
        }

        backend.chunks.write(hash, data).await?;

        let row = NewChunk {
            hash: hex,
            size,
            file_key: file_key.to_string(),
            chunk_index,
        };
        if let Err(e) = backend.index.upsert_chunk(row).await {
            // A pre-existing row still points at the file, so only undo a fresh write
            if !already_indexed {
                warn!(hash = %hash, "Catalog insert failed, removing written chunk: {}", e);
                if let Err(cleanup) = backend.chunks.delete(hash).await {
                    error!(hash = %hash, "Orphan chunk file left behind: {}", cleanup);
                }
            }
            return Err(e.into());
        }

        *changed = true;
        debug!(
            hash = %hash,
            size,
            file_key,
            chunk_index,
            new = !already_indexed,
            "Stored chunk"
        );
        Ok(())
    }

    /// Read a chunk; `None` if it is not stored. A successful read counts
    /// as an access for LRU purposes.
    ///
    /// # Errors
    ///
    /// `Cas(HashMismatch)` if the stored bytes are corrupt.
    pub async fn get_chunk(&self, hash: &ContentHash) -> Result<Option<Bytes>> {
        let backend = self.backend().await?;

        let data = match backend.chunks.read_verified(hash).await {
            Ok(data) => data,
            Err(e @ CasError::HashMismatch { .. }) => {
                error!(hash = %hash, "Stored chunk is corrupt: {}", e);
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        match &data {
            Some(bytes) => {
                if !backend.index.touch_chunk(&hash.to_hex()).await? {
                    warn!(hash = %hash, "Read chunk file has no catalog row; run repair");
                }
                trace!(hash = %hash, size = bytes.len(), "Chunk read");
            }
            None => trace!(hash = %hash, "Chunk not found"),
        }
        Ok(data)
    }

    /// Whether a chunk file exists for `hash`
    pub async fn has_chunk(&self, hash: &ContentHash) -> Result<bool> {
        let backend = self.backend().await?;
        Ok(backend.chunks.exists(hash).await?)
    }

    /// Delete a chunk and its row. Returns `false` if nothing was stored.
    pub async fn delete_chunk(&self, hash: &ContentHash) -> Result<bool> {
        let (guard, backend) = self.begin_write().await?;

        let removed = match backend.index.get_chunk(&hash.to_hex()).await? {
            Some(record) => {
                backend.remove_chunk(&record).await?;
                true
            }
            // An unindexed file is an orphan; clear it too
            None => backend.chunks.delete(hash).await?,
        };
        if removed {
            debug!(hash = %hash, "Deleted chunk");
            self.notify(&backend).await;
        }
        drop(guard);
        Ok(removed)
    }

    /// Current totals. A stopped engine reports zeros.
    pub async fn get_stats(&self) -> Result<StorageStats> {
        let backend = self.backend.read().await.clone();
        match backend {
            Some(backend) => backend.stats(self.config.max_size_bytes).await,
            None => Ok(StorageStats::stopped(self.config.max_size_bytes)),
        }
    }

    /// Register a callback run with fresh stats after every mutation.
    ///
    /// Callbacks run synchronously on the mutating task after the mutation
    /// has completed, while further mutations wait, so they observe stats in
    /// commit order. A panicking callback is logged and does not affect the
    /// mutation's result.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StorageStats) + Send + Sync + 'static,
    {
        self.notifier.add(callback)
    }

    /// Receive stats after every mutation over a broadcast channel
    pub fn subscribe(&self) -> broadcast::Receiver<StorageStats> {
        self.notifier.subscribe()
    }

    /// Publish fresh stats. Call with the write lock still held.
    pub(crate) async fn notify(&self, backend: &Backend) {
        if !self.notifier.has_observers() {
            return;
        }

        match backend.stats(self.config.max_size_bytes).await {
            Ok(stats) => self.notifier.notify(&stats),
            Err(e) => warn!("Failed to compute stats for change notification: {}", e),
        }
    }
}
