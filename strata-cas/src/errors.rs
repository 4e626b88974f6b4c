use thiserror::Error;

use crate::hash::ContentHash;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum CasError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid content hash: {0}")]
    InvalidHash(#[from] ValidationError),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("Storage path error: {0}")]
    StoragePath(String),

    #[error("Atomic write failed: {0}")]
    AtomicWriteFailed(String),
}

pub type Result<T> = std::result::Result<T, CasError>;
