use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use strata_cas::ContentHash;
use strata_store::{ChunkEngine, FileManifest};

mod config;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Content-addressed chunk storage", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.strata/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Storage directory to record in the config
        #[arg(short, long)]
        storage: Option<PathBuf>,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Store the contents of a file as one chunk
    Put {
        /// File holding the chunk bytes
        path: PathBuf,

        #[arg(long)]
        file_key: String,

        #[arg(long)]
        index: u32,
    },

    /// Read a chunk by hash
    Get {
        hash: ContentHash,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a chunk by hash
    Rm { hash: ContentHash },

    /// Register a file manifest
    Register {
        file_key: String,

        #[arg(long)]
        merkle_root: String,

        #[arg(long)]
        total_size: u64,

        #[arg(long)]
        chunk_count: u32,

        /// Arbitrary JSON stored with the manifest
        #[arg(long)]
        metadata: Option<String>,
    },

    /// List a file's chunks in order
    Chunks { file_key: String },

    /// List registered files, newest first
    Files,

    /// Delete a file and all its chunks
    RmFile { file_key: String },

    /// Show capacity usage
    Stats,

    /// Reconcile chunk files with the catalog
    Repair,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let config_path = config::resolve_config_path(cli.config.as_deref())?;
    debug!(path = %config_path.display(), "Using config file");

    if let Commands::Init { storage, force } = cli.command {
        let storage = match storage {
            Some(path) => path,
            None => config::default_storage_path()?,
        };
        let written = config::write_default(&config_path, storage, force)?;
        println!("Config written to {}", config_path.display());
        println!("Storage path: {}", written.storage_path.display());
        return Ok(());
    }

    let storage_config = config::load_or_default(&config_path, config::default_storage_path()?)?;
    let engine = ChunkEngine::new(storage_config);
    engine.start().await.context("Failed to start storage engine")?;

    let result = run(&engine, cli.command).await;
    engine.stop().await.context("Failed to stop storage engine")?;
    result
}

async fn run(engine: &ChunkEngine, command: Commands) -> Result<()> {
    match command {
        Commands::Init { .. } => anyhow::bail!("init runs without a storage engine"),
        Commands::Put {
            path,
            file_key,
            index,
        } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let hash = ContentHash::digest(&data);
            engine.put_chunk(&hash, &data, &file_key, index).await?;
            println!("{}", hash);
        }
        Commands::Get { hash, output } => {
            let data = engine
                .get_chunk(&hash)
                .await?
                .with_context(|| format!("Chunk not found: {}", hash))?;
            match output {
                Some(path) => tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&data)?;
                }
            }
        }
        Commands::Rm { hash } => {
            if engine.delete_chunk(&hash).await? {
                println!("Deleted {}", hash);
            } else {
                println!("Not stored: {}", hash);
            }
        }
        Commands::Register {
            file_key,
            merkle_root,
            total_size,
            chunk_count,
            metadata,
        } => {
            let mut manifest = FileManifest::new(&file_key, merkle_root, total_size, chunk_count);
            if let Some(raw) = metadata {
                let value = serde_json::from_str(&raw).context("--metadata is not valid JSON")?;
                manifest = manifest.with_metadata(value);
            }
            engine.register_file(manifest).await?;
            println!("Registered {}", file_key);
        }
        Commands::Chunks { file_key } => {
            let chunks = engine.get_file_chunks(&file_key).await?;
            println!("{}", serde_json::to_string_pretty(&chunks)?);
        }
        Commands::Files => {
            let files = engine.list_files().await?;
            println!("{}", serde_json::to_string_pretty(&files)?);
        }
        Commands::RmFile { file_key } => {
            let removed = engine.delete_file(&file_key).await?;
            println!("Deleted {} ({} chunks)", file_key, removed);
        }
        Commands::Stats => {
            let stats = engine.get_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Repair => {
            let report = engine.repair().await?;
            println!("Orphan files removed: {}", report.orphan_files_removed);
            println!("Missing rows removed: {}", report.missing_rows_removed);
            println!("Corrupt chunks removed: {}", report.corrupt_chunks_removed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_put() {
        let cli = Cli::try_parse_from([
            "strata", "-vv", "put", "chunk.bin", "--file-key", "movie", "--index", "3",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Put {
                path,
                file_key,
                index,
            } => {
                assert_eq!(path, PathBuf::from("chunk.bin"));
                assert_eq!(file_key, "movie");
                assert_eq!(index, 3);
            }
            _ => panic!("expected put"),
        }
    }

    #[test]
    fn test_rejects_malformed_hash() {
        assert!(Cli::try_parse_from(["strata", "get", "not-a-hash"]).is_err());

        let hex = ContentHash::digest(b"abc").to_hex();
        let cli = Cli::try_parse_from(["strata", "--config", "/tmp/c.toml", "rm", &hex]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(cli.command, Commands::Rm { hash } if hash.to_hex() == hex));
    }

    #[tokio::test]
    async fn test_run_against_engine() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = ChunkEngine::new(
            strata_store::StorageConfig::new(temp_dir.path())
                .with_fsync_policy(strata_store::FsyncPolicy::Never),
        );
        engine.start().await.unwrap();

        let input = temp_dir.path().join("input.bin");
        std::fs::write(&input, b"cli chunk").unwrap();
        run(
            &engine,
            Commands::Put {
                path: input,
                file_key: "f".into(),
                index: 0,
            },
        )
        .await
        .unwrap();

        let hash = ContentHash::digest(b"cli chunk");
        let output = temp_dir.path().join("output.bin");
        run(
            &engine,
            Commands::Get {
                hash,
                output: Some(output.clone()),
            },
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"cli chunk");

        assert!(run(
            &engine,
            Commands::Register {
                file_key: "f".into(),
                merkle_root: "r".into(),
                total_size: 9,
                chunk_count: 1,
                metadata: Some("{not json".into()),
            },
        )
        .await
        .is_err());

        run(&engine, Commands::RmFile { file_key: "f".into() }).await.unwrap();
        assert!(!engine.has_chunk(&hash).await.unwrap());
    }
}
