pub mod errors;
pub mod hash;
pub mod storage;
pub mod validation;

pub use errors::{CasError, Result};
pub use hash::ContentHash;
pub use storage::{ChunkStore, FsyncPolicy, RecoveryStats, CHUNKS_DIR};
