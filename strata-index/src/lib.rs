pub mod clock;
pub mod database;
pub mod errors;
pub mod schema;

pub use clock::AccessClock;
pub use database::{ChunkRecord, FileRecord, MetadataIndex, NewChunk, NewFile};
pub use errors::{IndexError, Result};
pub use schema::{INDEX_FILE_NAME, SCHEMA_VERSION};
