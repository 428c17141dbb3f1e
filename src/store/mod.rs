//! Work row storage
//!
//! The work table holds one row per logged frame. Rows are inserted by the
//! segment processor and claimed, embedded and finalized by the batch worker.
//! Two backends share the [`WorkStore`] trait:
//! - [`PostgresStore`]: `FOR UPDATE SKIP LOCKED` claims, pgvector embeddings
//! - [`SqliteStore`]: claimants serialize on SQLite's write lock
//!
//! The store also carries the named segment queue table used by
//! [`crate::queue::StoreSegmentQueue`].

pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use postgres::PostgresStore;
pub use schema::*;
pub use sqlite::SqliteStore;

use crate::config::{validate_table_name, DatabaseConfig};
use crate::error::{Error, Result};
use crate::frame::Frame;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Namespace for deterministic work row ids
const ROW_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_0c2e_93d4_4a57_b8e1_5a0d_2c77_e410);

/// A row to be inserted into the work table
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkRow {
    pub time: DateTime<Utc>,
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub role: String,
    pub seq: Option<i64>,
    pub content: String,
    /// JSON object text
    pub metadata: String,
    pub content_hash: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl NewWorkRow {
    /// Build a row from the `index`-th frame of a segment
    pub fn from_frame(frame: &Frame, index: usize, content_hash: Option<String>) -> Result<Self> {
        Ok(Self {
            time: frame.time,
            id: row_id(&frame.session_id, &frame.time, index),
            session_id: frame.session_id.clone(),
            user_id: frame.user_id.clone(),
            role: frame.role.to_string(),
            seq: frame.seq,
            content: frame.content.clone(),
            metadata: serde_json::to_string(&frame.metadata)?,
            content_hash,
            embedding: None,
        })
    }

    pub fn embedded(&self) -> bool {
        self.embedding.is_some()
    }
}

/// Deterministic row id: the same frame always maps to the same id
pub fn row_id(session_id: &str, time: &DateTime<Utc>, index: usize) -> String {
    let key = format!("{}\u{1f}{}\u{1f}{}", session_id, time.to_rfc3339(), index);
    Uuid::new_v5(&ROW_ID_NAMESPACE, key.as_bytes()).to_string()
}

/// A row held by a claim
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkRow {
    pub time: DateTime<Utc>,
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub content_hash: Option<String>,
}

/// Values written to a claimed row when it is finalized
#[derive(Debug, Clone)]
pub struct RowUpdate {
    pub time: DateTime<Utc>,
    pub id: String,
    pub embedding: Vec<f32>,
    /// Only applied when the row has no hash yet
    pub content_hash: Option<String>,
}

/// Row and queue counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatus {
    pub pending: i64,
    pub embedded: i64,
    pub queued: i64,
}

/// Rows locked by one claimant inside an open transaction.
///
/// Dropping a claim without finalizing it rolls the transaction back.
#[async_trait]
pub trait ClaimedBatch: Send {
    fn rows(&self) -> &[WorkRow];

    fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    /// Apply the updates and commit; returns the number of rows updated
    async fn finalize(self: Box<Self>, updates: Vec<RowUpdate>) -> Result<usize>;

    /// Roll the claim back, leaving every row claimable again
    async fn release(self: Box<Self>) -> Result<()>;
}

/// Storage backend for work rows and the segment queue
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// "postgres" or "sqlite"
    fn backend(&self) -> &'static str;

    fn table(&self) -> &str;

    /// Create the work table and queue table if they do not exist
    async fn init_schema(&self) -> Result<()>;

    /// Bulk insert, skipping rows whose `(time, id)` already exists.
    /// Returns the number of rows actually inserted.
    async fn insert_rows(&self, rows: &[NewWorkRow]) -> Result<usize>;

    /// Lock up to `limit` unembedded rows, oldest first
    async fn claim_batch(&self, limit: usize) -> Result<Box<dyn ClaimedBatch>>;

    async fn status(&self) -> Result<StoreStatus>;

    /// Append a segment path to the named queue
    async fn enqueue_segment(&self, queue: &str, path: &str) -> Result<()>;

    /// Remove and return the oldest path on the named queue
    async fn dequeue_segment(&self, queue: &str) -> Result<Option<String>>;
}

/// Open the store named by `database.url`
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn WorkStore>> {
    let url = config.require_url()?;
    validate_table_name(&config.table)?;

    let store: Arc<dyn WorkStore> = if url.starts_with("postgres://")
        || url.starts_with("postgresql://")
    {
        Arc::new(PostgresStore::connect(url, config).await?)
    } else if url.starts_with("sqlite:") {
        Arc::new(SqliteStore::connect(url, config).await?)
    } else {
        return Err(Error::Config(format!(
            "Unsupported database URL scheme: {} (expected postgres:// or sqlite:)",
            redact_url(url)
        )));
    };

    info!(backend = store.backend(), table = store.table(), "Connected to work store");
    Ok(store)
}

/// Text form of a vector: `[0.1,0.2,…]`.
/// Valid both as pgvector input and as a JSON array.
pub fn vector_literal(embedding: &[f32]) -> String {
    let mut out = String::with_capacity(embedding.len() * 10 + 2);
    out.push('[');
    for (i, v) in embedding.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

/// Parse the text form written by [`vector_literal`]
pub fn parse_vector(text: &str) -> Result<Vec<f32>> {
    serde_json::from_str(text)
        .map_err(|e| Error::Persistence(format!("Invalid stored embedding: {}", e)))
}

/// Strip credentials from a connection URL before logging it
pub fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => url.to_string(),
    }
}

/// SQLite store in `dir` with its schema created
#[cfg(test)]
pub(crate) async fn open_test_store(dir: &std::path::Path) -> Arc<dyn WorkStore> {
    let config = DatabaseConfig {
        url: Some(format!("sqlite://{}", dir.join("work.db").display())),
        ..Default::default()
    };
    let store = connect(&config).await.unwrap();
    store.init_schema().await.unwrap();
    store
}
