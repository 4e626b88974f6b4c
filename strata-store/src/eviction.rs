//! Least-recently-used eviction

use tracing::{debug, warn};

use crate::engine::Backend;
use crate::errors::Result;

/// Outcome of one eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Hashes removed, oldest first
    pub evicted: Vec<String>,
    pub freed_bytes: u64,
}

impl EvictionReport {
    pub fn evicted_count(&self) -> usize {
        self.evicted.len()
    }
}

/// Frees space by removing chunks in strict `last_accessed` order.
///
/// Every chunk is equally evictable; nothing is pinned. Candidates are
/// pulled from the catalog in bounded batches so a pass never loads the
/// whole table.
#[derive(Debug, Clone)]
pub struct EvictionManager {
    batch_size: usize,
}

impl EvictionManager {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Evict oldest chunks until at least `bytes_needed` bytes are freed or
    /// no candidates remain. A shortfall is reported, not raised; chunks
    /// removed along the way stay removed either way.
    pub(crate) async fn free_space(&self, backend: &Backend, bytes_needed: u64) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();

        while report.freed_bytes < bytes_needed {
            let candidates = backend.index.lru_candidates(self.batch_size).await?;
            if candidates.is_empty() {
                break;
            }

            let mut progressed = false;
            for candidate in candidates {
                if report.freed_bytes >= bytes_needed {
                    break;
                }

                match backend.remove_chunk(&candidate).await {
                    Ok(()) => {
                        debug!(
                            hash = %candidate.hash,
                            size = candidate.size,
                            last_accessed = candidate.last_accessed,
                            "Evicted chunk"
                        );
                        report.freed_bytes += candidate.size;
                        report.evicted.push(candidate.hash);
                        progressed = true;
                    }
                    Err(e) => {
                        warn!(hash = %candidate.hash, "Failed to evict chunk: {}", e);
                    }
                }
            }

            // Every candidate in the batch failed; the next batch would be the same
            if !progressed {
                break;
            }
        }

        if report.freed_bytes < bytes_needed {
            warn!(
                needed = bytes_needed,
                freed = report.freed_bytes,
                evicted = report.evicted_count(),
                "Eviction could not free enough space"
            );
        } else if !report.evicted.is_empty() {
            debug!(
                needed = bytes_needed,
                freed = report.freed_bytes,
                evicted = report.evicted_count(),
                "Eviction pass complete"
            );
        }

        Ok(report)
    }
}

impl Default for EvictionManager {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVICTION_BATCH_SIZE)
    }
}
