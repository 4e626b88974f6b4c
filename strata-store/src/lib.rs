//! Capacity-bounded chunk storage engine
//!
//! [`ChunkEngine`] ties the sharded [`strata_cas::ChunkStore`] to the
//! [`strata_index::MetadataIndex`] catalog, keeps the two in step, evicts
//! least recently used chunks to stay under the configured capacity, and
//! notifies observers after every mutation.

pub mod config;
pub mod engine;
pub mod errors;
pub mod eviction;
pub mod registry;
pub mod repair;
pub mod stats;

pub use config::StorageConfig;
pub use engine::ChunkEngine;
pub use errors::{Result, StoreError};
pub use eviction::{EvictionManager, EvictionReport};
pub use registry::FileManifest;
pub use repair::RepairReport;
pub use stats::{StorageStats, Subscription};

pub use strata_cas::{ContentHash, FsyncPolicy};
pub use strata_index::{ChunkRecord, FileRecord};
