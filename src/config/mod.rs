//! Configuration management for seglog
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session log and rotation settings
    #[serde(default)]
    pub log: LogConfig,

    /// Where sealed segments are handed off
    #[serde(default)]
    pub queue: QueueConfig,

    /// Work table connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding service client
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Batch claim worker
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Path the config was loaded from (not serialized)
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

/// Session log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory holding open and sealed segments
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// Seal once the open segment reaches this many bytes (0 disables)
    #[serde(default = "default_log_max_bytes")]
    pub max_bytes: u64,

    /// Seal once the open segment is this old, in seconds
    #[serde(default = "default_log_max_age_secs")]
    pub max_age_secs: Option<u64>,

    /// fsync after every append
    #[serde(default = "default_log_fsync")]
    pub fsync: bool,

    /// Treat queue hand-off failures as fatal
    #[serde(default = "default_log_strict_handoff")]
    pub strict_handoff: bool,

    /// Maximum length of a sanitized session id
    #[serde(default = "default_log_max_session_id_len")]
    pub max_session_id_len: usize,
}

/// Segment queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// "log" (only log sealed paths) or "database" (named list in the work store)
    #[serde(default = "default_queue_backend")]
    pub backend: String,

    /// List name sealed segments are pushed onto
    #[serde(default = "default_queue_name")]
    pub name: String,
}

/// Work store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `postgres://…` or `sqlite://…`
    #[serde(default = "default_database_url")]
    pub url: Option<String>,

    /// Work row table
    #[serde(default = "default_database_table")]
    pub table: String,

    /// Connection pool size
    #[serde(default = "default_database_max_connections")]
    pub max_connections: u32,

    /// How long a SQLite claimant waits for the write lock
    #[serde(default = "default_database_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Full URL the batch request is POSTed to
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Request body key: "texts" or "inputs"
    #[serde(default = "default_embedding_request_format")]
    pub request_format: String,

    /// Expected vector dimension (unchecked when absent)
    #[serde(default)]
    pub dimension: Option<usize>,

    /// HTTP timeout in seconds
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Exponential backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Batch claim worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Rows claimed per iteration
    #[serde(default = "default_worker_batch_size")]
    pub batch_size: usize,

    /// Sleep when no work is found, in milliseconds
    #[serde(default = "default_worker_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Sleep after a failed iteration, in milliseconds
    #[serde(default = "default_worker_recovery_delay_ms")]
    pub recovery_delay_ms: u64,

    /// Stop after this many iterations (runs forever when absent)
    #[serde(default)]
    pub max_iterations: Option<u64>,

    /// File that receives a liveness timestamp on idle polls
    #[serde(default)]
    pub health_file: Option<PathBuf>,

    /// Compute content_hash for rows that lack one
    #[serde(default = "default_worker_hash_content")]
    pub hash_content: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            max_bytes: default_log_max_bytes(),
            max_age_secs: default_log_max_age_secs(),
            fsync: default_log_fsync(),
            strict_handoff: default_log_strict_handoff(),
            max_session_id_len: default_log_max_session_id_len(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
            name: default_queue_name(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            table: default_database_table(),
            max_connections: default_database_max_connections(),
            busy_timeout_ms: default_database_busy_timeout_ms(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            request_format: default_embedding_request_format(),
            dimension: None,
            timeout_secs: default_embedding_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_retry_max_retries(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_worker_batch_size(),
            poll_interval_ms: default_worker_poll_interval_ms(),
            recovery_delay_ms: default_worker_recovery_delay_ms(),
            max_iterations: None,
            health_file: None,
            hash_content: default_worker_hash_content(),
        }
    }
}

impl LogConfig {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }
}

impl DatabaseConfig {
    /// The configured URL, or a configuration error naming how to set it
    pub fn require_url(&self) -> Result<&str> {
        match self.url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(Error::Config(
                "database.url is not set (use --database-url or DATABASE_URL)".to_string(),
            )),
        }
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid")
    })
}

/// Check that `name` is safe to interpolate as a SQL table name
pub fn validate_table_name(name: &str) -> Result<()> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "database.table '{}' must match [A-Za-z_][A-Za-z0-9_]*",
            name
        )))
    }
}

impl Config {
    /// Get the default base directory for seglog (~/.seglog)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".seglog")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.config_file = Some(config_path.to_path_buf());

        config.validate()?;
        Ok(config)
    }

    /// Load an explicit config file, or the default one if it exists, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Self::default_config_path();
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            debug!("No config file found, using defaults");
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.log.max_session_id_len == 0 {
            return Err(Error::Config(
                "log.max_session_id_len must be positive".to_string(),
            ));
        }

        if !matches!(self.queue.backend.as_str(), "log" | "database") {
            return Err(Error::Config(format!(
                "queue.backend must be 'log' or 'database', got '{}'",
                self.queue.backend
            )));
        }

        if self.queue.name.trim().is_empty() {
            return Err(Error::Config("queue.name must not be empty".to_string()));
        }

        validate_table_name(&self.database.table)?;

        if self.database.max_connections == 0 {
            return Err(Error::Config(
                "database.max_connections must be positive".to_string(),
            ));
        }

        if self.embedding.endpoint.trim().is_empty() {
            return Err(Error::Config(
                "embedding.endpoint must not be empty".to_string(),
            ));
        }
        url::Url::parse(&self.embedding.endpoint).map_err(|e| {
            Error::Config(format!(
                "embedding.endpoint '{}' is not a valid URL: {}",
                self.embedding.endpoint, e
            ))
        })?;

        if !matches!(self.embedding.request_format.as_str(), "texts" | "inputs") {
            return Err(Error::Config(format!(
                "embedding.request_format must be 'texts' or 'inputs', got '{}'",
                self.embedding.request_format
            )));
        }

        if self.embedding.retry.max_delay_ms < self.embedding.retry.base_delay_ms {
            return Err(Error::Config(
                "embedding.retry.max_delay_ms must be >= base_delay_ms".to_string(),
            ));
        }

        if self.worker.batch_size == 0 {
            return Err(Error::Config(
                "worker.batch_size must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.table, "events");
        assert_eq!(config.queue.backend, "log");
        assert_eq!(config.worker.batch_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        let mut config = Config::default();
        config.log.max_bytes = 1024;
        config.worker.max_iterations = Some(3);

        config.save(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.log.max_bytes, 1024);
        assert_eq!(loaded.worker.max_iterations, Some(3));
        assert_eq!(loaded.config_file.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[worker]\nbatch_size = 6\n").unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.worker.batch_size, 6);
        assert_eq!(loaded.worker.poll_interval_ms, default_worker_poll_interval_ms());
        assert_eq!(loaded.embedding.request_format, "texts");
    }

    #[test]
    fn test_missing_explicit_file_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let err = Config::load(&tmp.path().join("nope.toml")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.worker.batch_size = 0;
        assert!(config.validate().is_err());
        config.worker.batch_size = 8;
        assert!(config.validate().is_ok());

        config.database.table = "events; DROP TABLE x".to_string();
        assert!(config.validate().is_err());
        config.database.table = "chat_events".to_string();
        assert!(config.validate().is_ok());

        config.embedding.request_format = "prompts".to_string();
        assert!(config.validate().is_err());
        config.embedding.request_format = "inputs".to_string();

        config.embedding.retry.max_delay_ms = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_url() {
        let mut db = DatabaseConfig::default();
        db.url = None;
        assert!(matches!(db.require_url(), Err(Error::Config(_))));

        db.url = Some("sqlite://events.db".to_string());
        assert_eq!(db.require_url().unwrap(), "sqlite://events.db");
    }
}
