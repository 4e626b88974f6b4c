use thiserror::Error;

use strata_cas::validation::ValidationError;
use strata_cas::{CasError, ContentHash};
use strata_index::IndexError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Chunk store error: {0}")]
    Cas(#[from] CasError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Storage engine is not running")]
    NotRunning,

    #[error("Integrity check failed: claimed {expected}, data hashes to {actual}")]
    IntegrityMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("Chunk of {size} bytes can never fit in a capacity of {max} bytes")]
    ChunkTooLarge { size: u64, max: u64 },

    #[error("Insufficient capacity: needed {needed} bytes, eviction freed {freed}")]
    CapacityExceeded { needed: u64, freed: u64 },
}

impl StoreError {
    /// Supplied bytes did not match their claimed hash
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, StoreError::IntegrityMismatch { .. })
    }

    /// The chunk could not be admitted under the capacity limit
    pub fn is_capacity_failure(&self) -> bool {
        matches!(
            self,
            StoreError::ChunkTooLarge { .. } | StoreError::CapacityExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
