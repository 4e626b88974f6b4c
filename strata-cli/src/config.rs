use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use strata_store::StorageConfig;

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Home directory not found")?;
    Ok(home.join(".strata").join("config.toml"))
}

/// Get the default storage path
pub fn default_storage_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Home directory not found")?;
    Ok(home.join(".strata").join("storage"))
}

/// Resolve the config file location: an explicit `--config` wins
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => get_config_path(),
    }
}

/// Load the config at `path`, falling back to defaults when it does not exist
pub fn load_or_default(path: &Path, default_storage: PathBuf) -> Result<StorageConfig> {
    if !path.exists() {
        return Ok(StorageConfig::new(default_storage));
    }
    StorageConfig::load(path)
        .with_context(|| format!("Failed to load config file: {}", path.display()))
}

/// Write a fresh config to `path`. Refuses to overwrite unless `force` is set.
pub fn write_default(path: &Path, storage_path: PathBuf, force: bool) -> Result<StorageConfig> {
    if path.exists() && !force {
        anyhow::bail!("Config file already exists: {}", path.display());
    }

    let config = StorageConfig::new(storage_path);
    config
        .save(path)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let storage = temp_dir.path().join("storage");

        let config = load_or_default(&temp_dir.path().join("absent.toml"), storage.clone()).unwrap();
        assert_eq!(config, StorageConfig::new(storage));
    }

    #[test]
    fn test_write_then_load() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");
        let storage = temp_dir.path().join("data");

        let written = write_default(&path, storage.clone(), false).unwrap();
        let loaded = load_or_default(&path, PathBuf::from("ignored")).unwrap();
        assert_eq!(loaded, written);
        assert_eq!(loaded.storage_path, storage);

        assert!(write_default(&path, storage.clone(), false).is_err());
        assert!(write_default(&path, storage, true).is_ok());
    }

    #[test]
    fn test_malformed_config_is_reported() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "max_size_bytes = \"lots\"").unwrap();

        let err = load_or_default(&path, PathBuf::from("storage")).unwrap_err();
        assert!(err.to_string().contains("Failed to load config file"));
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = Path::new("/etc/strata.toml");
        assert_eq!(resolve_config_path(Some(explicit)).unwrap(), explicit);
    }
}
