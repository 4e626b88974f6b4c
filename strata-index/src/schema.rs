/// Catalog schema version
pub const SCHEMA_VERSION: u32 = 1;

/// File name of the catalog inside the storage directory
pub const INDEX_FILE_NAME: &str = "index.db";

/// Pragmas applied to every pooled connection
pub const CONNECTION_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA temp_store = MEMORY;
"#;

/// SQL schema for the chunk catalog
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- One row per chunk file on disk. Timestamps are unix milliseconds.
CREATE TABLE IF NOT EXISTS chunks (
    hash TEXT PRIMARY KEY,
    size INTEGER NOT NULL,
    file_key TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    last_accessed INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_chunks_file_key ON chunks(file_key);
CREATE INDEX IF NOT EXISTS idx_chunks_last_accessed ON chunks(last_accessed); -- LRU scans

-- File manifests. metadata is caller-defined JSON.
CREATE TABLE IF NOT EXISTS files (
    file_key TEXT PRIMARY KEY,
    merkle_root TEXT NOT NULL,
    total_size INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_files_merkle_root ON files(merkle_root);
"#;
