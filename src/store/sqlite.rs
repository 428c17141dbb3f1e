//! SQLite work store
//!
//! SQLite has no row locks, so a claim opens its transaction with a write
//! (a no-op `UPDATE … RETURNING` over the selected rows). That takes the
//! database write lock immediately; a second claimant blocks on the busy
//! timeout until the first commits or rolls back, then sees the committed
//! state and picks only rows that are still unembedded.

use super::{
    schema::{queue_table, sqlite_schema},
    vector_literal, ClaimedBatch, NewWorkRow, RowUpdate, StoreStatus, WorkRow, WorkStore,
};
use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Rows per INSERT statement, well under SQLite's bind parameter limit
const INSERT_CHUNK: usize = 500;

/// SQLite-backed work store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
    queue_table: String,
}

impl SqliteStore {
    /// Connect to `sqlite://path` (the file is created when missing)
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        debug!(path = ?options.get_filename(), "Connecting to SQLite work store");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(2))
            .connect_with(options)
            .await?;

        Ok(Self::with_pool(pool, &config.table))
    }

    pub fn with_pool(pool: SqlitePool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
            queue_table: queue_table(table),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl WorkStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn table(&self) -> &str {
        &self.table
    }

    async fn init_schema(&self) -> Result<()> {
        info!(table = %self.table, "Initializing SQLite schema");
        for statement in sqlite_schema(&self.table) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn insert_rows(&self, rows: &[NewWorkRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "INSERT INTO {} (time, id, session_id, user_id, role, seq, content, metadata, content_hash, embedded, embedding) ",
                self.table
            ));
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.time)
                    .push_bind(&row.id)
                    .push_bind(&row.session_id)
                    .push_bind(&row.user_id)
                    .push_bind(&row.role)
                    .push_bind(row.seq)
                    .push_bind(&row.content)
                    .push_bind(&row.metadata)
                    .push_bind(&row.content_hash)
                    .push_bind(row.embedded())
                    .push_bind(row.embedding.as_deref().map(vector_literal));
            });
            qb.push(" ON CONFLICT (time, id) DO NOTHING");

            let result = qb.build().execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        debug!(offered = rows.len(), inserted, "Inserted work rows");
        Ok(inserted)
    }

    async fn claim_batch(&self, limit: usize) -> Result<Box<dyn ClaimedBatch>> {
        let mut tx = self.pool.begin().await?;

        // No-op write: acquires the write lock as the first statement
        let sql = format!(
            r#"
            UPDATE {t} SET embedded = embedded
            WHERE rowid IN (
                SELECT rowid FROM {t}
                WHERE embedded = 0 AND embedding IS NULL
                ORDER BY time ASC
                LIMIT ?
            )
            RETURNING time, id, session_id, content, content_hash
            "#,
            t = self.table
        );
        let mut rows: Vec<WorkRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&mut *tx)
            .await?;
        rows.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));

        debug!(claimed = rows.len(), limit, "Claimed work rows");
        Ok(Box::new(SqliteClaim {
            tx,
            rows,
            table: self.table.clone(),
        }))
    }

    async fn status(&self) -> Result<StoreStatus> {
        let (pending,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {} WHERE embedded = 0",
            self.table
        ))
        .fetch_one(&self.pool)
        .await?;
        let (embedded,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {} WHERE embedded = 1",
            self.table
        ))
        .fetch_one(&self.pool)
        .await?;
        let (queued,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", self.queue_table))
                .fetch_one(&self.pool)
                .await?;

        Ok(StoreStatus {
            pending,
            embedded,
            queued,
        })
    }

    async fn enqueue_segment(&self, queue: &str, path: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (queue, path) VALUES (?, ?)",
            self.queue_table
        ))
        .bind(queue)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dequeue_segment(&self, queue: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(&format!(
            r#"
            DELETE FROM {q}
            WHERE id = (SELECT id FROM {q} WHERE queue = ? ORDER BY id LIMIT 1)
            RETURNING path
            "#,
            q = self.queue_table
        ))
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(path,)| path))
    }
}

/// Rows claimed under an open SQLite write transaction
struct SqliteClaim {
    tx: Transaction<'static, Sqlite>,
    rows: Vec<WorkRow>,
    table: String,
}

#[async_trait]
impl ClaimedBatch for SqliteClaim {
    fn rows(&self) -> &[WorkRow] {
        &self.rows
    }

    async fn finalize(self: Box<Self>, updates: Vec<RowUpdate>) -> Result<usize> {
        let SqliteClaim { mut tx, table, .. } = *self;

        let sql = format!(
            "UPDATE {} SET embedding = ?, embedded = 1, content_hash = COALESCE(content_hash, ?) WHERE time = ? AND id = ?",
            table
        );
        let mut updated = 0usize;
        for update in &updates {
            let result = sqlx::query(&sql)
                .bind(vector_literal(&update.embedding))
                .bind(&update.content_hash)
                .bind(update.time)
                .bind(&update.id)
                .execute(&mut *tx)
                .await?;
            updated += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn release(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{content_hash, Frame, Role};
    use crate::store::parse_vector;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup_test_store() -> (SqliteStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let config = DatabaseConfig {
            url: Some(format!("sqlite://{}", tmp.path().join("work.db").display())),
            ..Default::default()
        };
        let store = SqliteStore::connect(config.url.as_deref().unwrap(), &config)
            .await
            .unwrap();
        store.init_schema().await.unwrap();
        (store, tmp)
    }

    fn rows(count: usize) -> Vec<NewWorkRow> {
        (0..count)
            .map(|i| {
                let frame = Frame::new("abc", "u1", Role::User, format!("message {i}"))
                    .with_time(Utc.with_ymd_and_hms(2025, 1, 1, 10, i as u32, 0).unwrap())
                    .with_seq(i as i64);
                NewWorkRow::from_frame(&frame, i, None).unwrap()
            })
            .collect()
    }

    fn updates_for(batch: &dyn ClaimedBatch) -> Vec<RowUpdate> {
        batch
            .rows()
            .iter()
            .map(|r| RowUpdate {
                time: r.time,
                id: r.id.clone(),
                embedding: vec![0.1, 0.2, 0.3],
                content_hash: Some(content_hash(&r.content)),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let (store, _tmp) = setup_test_store().await;
        let batch = rows(5);

        assert_eq!(store.insert_rows(&batch).await.unwrap(), 5);
        assert_eq!(store.insert_rows(&batch).await.unwrap(), 0);
        assert_eq!(store.insert_rows(&[]).await.unwrap(), 0);

        let status = store.status().await.unwrap();
        assert_eq!(status.pending, 5);
        assert_eq!(status.embedded, 0);
    }

    #[tokio::test]
    async fn test_claim_returns_oldest_first_and_finalize_commits() {
        let (store, _tmp) = setup_test_store().await;
        let mut batch = rows(4);
        batch.reverse();
        store.insert_rows(&batch).await.unwrap();

        let claim = store.claim_batch(3).await.unwrap();
        let contents: Vec<&str> = claim.rows().iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["message 0", "message 1", "message 2"]);

        let updates = updates_for(claim.as_ref());
        assert_eq!(claim.finalize(updates).await.unwrap(), 3);

        let status = store.status().await.unwrap();
        assert_eq!(status.embedded, 3);
        assert_eq!(status.pending, 1);

        let (embedding, hash): (String, Option<String>) = sqlx::query_as(
            "SELECT embedding, content_hash FROM events WHERE content = 'message 0'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(parse_vector(&embedding).unwrap(), vec![0.1, 0.2, 0.3]);
        assert_eq!(hash, Some(content_hash("message 0")));

        let next = store.claim_batch(10).await.unwrap();
        assert_eq!(next.rows().len(), 1);
        assert_eq!(next.rows()[0].content, "message 3");
        next.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_finalize_keeps_existing_hash() {
        let (store, _tmp) = setup_test_store().await;
        let mut batch = rows(1);
        batch[0].content_hash = Some("precomputed".to_string());
        store.insert_rows(&batch).await.unwrap();

        let claim = store.claim_batch(1).await.unwrap();
        let updates = updates_for(claim.as_ref());
        claim.finalize(updates).await.unwrap();

        let (hash,): (Option<String>,) = sqlx::query_as("SELECT content_hash FROM events")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(hash.as_deref(), Some("precomputed"));
    }

    #[tokio::test]
    async fn test_release_leaves_rows_claimable() {
        let (store, _tmp) = setup_test_store().await;
        store.insert_rows(&rows(3)).await.unwrap();

        let claim = store.claim_batch(3).await.unwrap();
        assert_eq!(claim.rows().len(), 3);
        claim.release().await.unwrap();

        let again = store.claim_batch(3).await.unwrap();
        assert_eq!(again.rows().len(), 3);
        again.release().await.unwrap();

        assert_eq!(store.status().await.unwrap().pending, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_claimants_never_share_rows() {
        let (store, _tmp) = setup_test_store().await;
        store.insert_rows(&rows(10)).await.unwrap();
        let store = Arc::new(store);

        let first = store.claim_batch(6).await.unwrap();
        assert_eq!(first.rows().len(), 6);
        let first_ids: HashSet<String> = first.rows().iter().map(|r| r.id.clone()).collect();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let claim = store.claim_batch(6).await.unwrap();
                let ids: Vec<String> = claim.rows().iter().map(|r| r.id.clone()).collect();
                let updates = updates_for(claim.as_ref());
                claim.finalize(updates).await.unwrap();
                ids
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!contender.is_finished());

        let updates = updates_for(first.as_ref());
        first.finalize(updates).await.unwrap();

        let second_ids = contender.await.unwrap();
        assert_eq!(second_ids.len(), 4);
        assert!(second_ids.iter().all(|id| !first_ids.contains(id)));

        let status = store.status().await.unwrap();
        assert_eq!(status.embedded, 10);
        assert_eq!(status.pending, 0);
    }

    #[tokio::test]
    async fn test_segment_queue_is_fifo_per_name() {
        let (store, _tmp) = setup_test_store().await;
        store.enqueue_segment("sealed", "/a.log").await.unwrap();
        store.enqueue_segment("other", "/x.log").await.unwrap();
        store.enqueue_segment("sealed", "/b.log").await.unwrap();

        assert_eq!(store.status().await.unwrap().queued, 3);
        assert_eq!(
            store.dequeue_segment("sealed").await.unwrap().as_deref(),
            Some("/a.log")
        );
        assert_eq!(
            store.dequeue_segment("sealed").await.unwrap().as_deref(),
            Some("/b.log")
        );
        assert_eq!(store.dequeue_segment("sealed").await.unwrap(), None);
        assert_eq!(store.status().await.unwrap().queued, 1);
    }
}
