//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Resolve where `init` writes: a `.toml` path is used as is, anything else
/// is treated as a directory holding `config.toml`
pub fn resolve_config_path(path: Option<&Path>) -> PathBuf {
    match path {
        Some(p) if p.extension().is_some_and(|e| e == "toml") => p.to_path_buf(),
        Some(dir) => dir.join("config.toml"),
        None => Config::default_config_path(),
    }
}

/// Write a default configuration file
pub fn cmd_init(config_path: &Path, force: bool) -> Result<Config> {
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config file already exists at: {} (use --force to overwrite)",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.config_file = Some(config_path.to_path_buf());
    config.save(config_path)?;
    info!(path = %config_path.display(), "Initialized configuration");
    Ok(config)
}

pub fn print_init(config: &Config) {
    let path = config
        .config_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    println!("✓ seglog initialized");
    println!("  Config: {}", path);
    println!("  Segments: {}", config.log.dir.display());
    println!("\nNext steps:");
    println!("  1. Set database.url (or DATABASE_URL) and run 'seglog db init'");
    println!("  2. Append events: seglog append <session> <content> --auto-seq");
    println!("  3. Start a worker: seglog worker");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_loadable_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        cmd_init(&path, false).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.worker.batch_size, 32);
        assert_eq!(loaded.config_file.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[worker]\nbatch_size = 7\n").unwrap();

        let err = cmd_init(&path, false).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(Config::load(&path).unwrap().worker.batch_size, 7);

        cmd_init(&path, true).unwrap();
        assert_eq!(Config::load(&path).unwrap().worker.batch_size, 32);
    }

    #[test]
    fn test_resolve_config_path() {
        let dir = Path::new("/etc/seglog");
        assert_eq!(
            resolve_config_path(Some(dir)),
            PathBuf::from("/etc/seglog/config.toml")
        );
        let file = Path::new("/etc/seglog/custom.toml");
        assert_eq!(resolve_config_path(Some(file)), file.to_path_buf());
    }
}
