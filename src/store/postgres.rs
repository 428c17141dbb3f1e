//! Postgres work store
//!
//! Claims use `SELECT … FOR UPDATE SKIP LOCKED`, so any number of workers
//! can poll the same table and each row is locked by at most one of them.
//! Embeddings are stored in a pgvector `vector` column, written through its
//! text form.

use super::{
    schema::{postgres_schema, queue_table},
    vector_literal, ClaimedBatch, NewWorkRow, RowUpdate, StoreStatus, WorkRow, WorkStore,
};
use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};

/// Rows per INSERT statement (11 binds each, under the 65535 limit)
const INSERT_CHUNK: usize = 1000;

/// Postgres-backed work store
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    table: String,
    queue_table: String,
}

impl PostgresStore {
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self> {
        debug!(url = %super::redact_url(url), "Connecting to Postgres work store");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;
        Ok(Self::with_pool(pool, &config.table))
    }

    pub fn with_pool(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
            queue_table: queue_table(table),
        }
    }
}

fn insert_query<'a>(table: &str, rows: &'a [NewWorkRow]) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} (time, id, session_id, user_id, role, seq, content, metadata, content_hash, embedded, embedding) ",
        table
    ));
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.time)
            .push_bind(&row.id)
            .push_bind(&row.session_id)
            .push_bind(&row.user_id)
            .push_bind(&row.role)
            .push_bind(row.seq)
            .push_bind(&row.content)
            .push_bind(&row.metadata)
            .push_unseparated("::jsonb")
            .push_bind(&row.content_hash)
            .push_bind(row.embedded())
            .push_bind(row.embedding.as_deref().map(vector_literal))
            .push_unseparated("::vector");
    });
    qb.push(" ON CONFLICT (time, id) DO NOTHING");
    qb
}

fn finalize_query<'a>(table: &str, updates: &'a [RowUpdate]) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "UPDATE {} AS t SET embedding = v.embedding::vector, embedded = TRUE, \
         content_hash = COALESCE(t.content_hash, v.content_hash) FROM (",
        table
    ));
    qb.push_values(updates, |mut b, update| {
        b.push_bind(update.time)
            .push_bind(&update.id)
            .push_bind(vector_literal(&update.embedding))
            .push_bind(&update.content_hash);
    });
    qb.push(") AS v(time, id, embedding, content_hash) WHERE t.time = v.time AND t.id = v.id");
    qb
}

#[async_trait]
impl WorkStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn table(&self) -> &str {
        &self.table
    }

    async fn init_schema(&self) -> Result<()> {
        info!(table = %self.table, "Initializing Postgres schema");
        for statement in postgres_schema(&self.table) {
            sqlx::raw_sql(&statement).execute(&self.pool).await?;
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
            let result = insert_query(&self.table, chunk)
                .build()
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;

        debug!(offered = rows.len(), inserted, "Inserted work rows");
        Ok(inserted)
    }

    async fn claim_batch(&self, limit: usize) -> Result<Box<dyn ClaimedBatch>> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            r#"
            SELECT time, id, session_id, content, content_hash
            FROM {}
            WHERE embedded = FALSE AND embedding IS NULL
            ORDER BY time ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
            self.table
        );
        let rows: Vec<WorkRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&mut *tx)
            .await?;

        debug!(claimed = rows.len(), limit, "Claimed work rows");
        Ok(Box::new(PostgresClaim {
            tx,
            rows,
            table: self.table.clone(),
        }))
    }

    async fn status(&self) -> Result<StoreStatus> {
        let (pending, embedded): (i64, i64) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FILTER (WHERE NOT embedded), COUNT(*) FILTER (WHERE embedded) FROM {}",
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
            "INSERT INTO {} (queue, path) VALUES ($1, $2)",
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
            WHERE id = (
                SELECT id FROM {q} WHERE queue = $1
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
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

/// Rows locked with `FOR UPDATE` inside an open transaction
struct PostgresClaim {
    tx: Transaction<'static, Postgres>,
    rows: Vec<WorkRow>,
    table: String,
}

#[async_trait]
impl ClaimedBatch for PostgresClaim {
    fn rows(&self) -> &[WorkRow] {
        &self.rows
    }

    async fn finalize(self: Box<Self>, updates: Vec<RowUpdate>) -> Result<usize> {
        let PostgresClaim { mut tx, table, .. } = *self;

        let mut updated = 0usize;
        if !updates.is_empty() {
            let result = finalize_query(&table, &updates)
                .build()
                .execute(&mut *tx)
                .await?;
            updated = result.rows_affected() as usize;
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
    use crate::frame::{Frame, Role};
    use chrono::Utc;

    #[test]
    fn test_insert_query_casts_json_and_vector() {
        let frame = Frame::new("abc", "u1", Role::User, "hi");
        let mut row = NewWorkRow::from_frame(&frame, 0, None).unwrap();
        row.embedding = Some(vec![1.0, 2.0]);
        let rows = vec![row.clone(), row];

        let qb = insert_query("events", &rows);
        let sql = qb.sql();
        assert!(sql.starts_with("INSERT INTO events (time, id,"));
        assert!(sql.contains("$8::jsonb"));
        assert!(sql.contains("$11::vector"));
        assert!(sql.contains("$22::vector"));
        assert!(sql.ends_with("ON CONFLICT (time, id) DO NOTHING"));
    }

    #[test]
    fn test_finalize_query_joins_on_time_and_id() {
        let updates = vec![RowUpdate {
            time: Utc::now(),
            id: "r1".to_string(),
            embedding: vec![0.5],
            content_hash: None,
        }];
        let qb = finalize_query("events", &updates);
        let sql = qb.sql();
        assert!(sql.starts_with("UPDATE events AS t SET embedding = v.embedding::vector"));
        assert!(sql.contains("VALUES ($1, $2, $3, $4)"));
        assert!(sql.ends_with("WHERE t.time = v.time AND t.id = v.id"));
    }
}
