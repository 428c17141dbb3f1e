//! Default values for configuration

use std::path::PathBuf;

/// Default segment directory
pub fn default_log_dir() -> PathBuf {
    std::env::var("SEGLOG_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data/sessions"))
}

/// Default size threshold before a segment is sealed (8 MiB)
pub fn default_log_max_bytes() -> u64 {
    8 * 1024 * 1024
}

/// Default age threshold before a segment is sealed (one hour)
pub fn default_log_max_age_secs() -> Option<u64> {
    Some(3600)
}

/// Default: no fsync after each append
pub fn default_log_fsync() -> bool {
    false
}

/// Default: queue hand-off failures are logged, not fatal
pub fn default_log_strict_handoff() -> bool {
    false
}

/// Default maximum length of a sanitized session id
pub fn default_log_max_session_id_len() -> usize {
    64
}

/// Default segment queue backend
pub fn default_queue_backend() -> String {
    "log".to_string()
}

/// Default segment queue name
pub fn default_queue_name() -> String {
    "seglog:sealed".to_string()
}

/// Default database URL (read from DATABASE_URL when present)
pub fn default_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Default work table name
pub fn default_database_table() -> String {
    "events".to_string()
}

/// Default connection pool size
pub fn default_database_max_connections() -> u32 {
    5
}

/// Default SQLite busy timeout in milliseconds
pub fn default_database_busy_timeout_ms() -> u64 {
    5000
}

/// Default embedding service endpoint
pub fn default_embedding_endpoint() -> String {
    std::env::var("SEGLOG_EMBEDDING_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8080/embed".to_string())
}

/// Default request body shape
pub fn default_embedding_request_format() -> String {
    "texts".to_string()
}

/// Default HTTP timeout for embedding calls in seconds
pub fn default_embedding_timeout_secs() -> u64 {
    60
}

/// Default maximum retries for an embedding request
pub fn default_retry_max_retries() -> usize {
    5
}

/// Default initial backoff in milliseconds
pub fn default_retry_base_delay_ms() -> u64 {
    250
}

/// Default backoff cap in milliseconds
pub fn default_retry_max_delay_ms() -> u64 {
    10_000
}

/// Default rows claimed per iteration
pub fn default_worker_batch_size() -> usize {
    32
}

/// Default idle poll interval in milliseconds
pub fn default_worker_poll_interval_ms() -> u64 {
    2000
}

/// Default pause after a failed iteration in milliseconds
pub fn default_worker_recovery_delay_ms() -> u64 {
    1000
}

/// Default: compute missing content hashes during finalize
pub fn default_worker_hash_content() -> bool {
    true
}
