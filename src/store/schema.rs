//! Work table and segment queue schema for both backends
//!
//! Table names are interpolated, so callers must pass names that have been
//! through [`crate::config::validate_table_name`].

/// Name of the segment queue table that sits beside a work table
pub fn queue_table(table: &str) -> String {
    format!("{}_queue", table)
}

/// SQLite DDL. `embedding` holds a JSON array of floats.
pub fn sqlite_schema(table: &str) -> Vec<String> {
    let queue = queue_table(table);
    vec![
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {table} (
    time TEXT NOT NULL,
    id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    seq INTEGER,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{{}}',
    content_hash TEXT,
    embedded INTEGER NOT NULL DEFAULT 0,
    embedding TEXT,
    PRIMARY KEY (time, id)
)"#
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_pending ON {table}(embedded, time)"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_session ON {table}(session_id, time)"),
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {queue} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    path TEXT NOT NULL,
    enqueued_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)"#
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{queue}_name ON {queue}(queue, id)"),
    ]
}

/// Postgres DDL. `embedding` uses the pgvector `vector` type.
pub fn postgres_schema(table: &str) -> Vec<String> {
    let queue = queue_table(table);
    vec![
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {table} (
    time TIMESTAMPTZ NOT NULL,
    id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    seq BIGINT,
    content TEXT NOT NULL,
    metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
    content_hash TEXT,
    embedded BOOLEAN NOT NULL DEFAULT FALSE,
    embedding vector,
    PRIMARY KEY (time, id)
)"#
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_pending ON {table}(time) WHERE embedded = FALSE"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_session ON {table}(session_id, time)"),
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {queue} (
    id BIGSERIAL PRIMARY KEY,
    queue TEXT NOT NULL,
    path TEXT NOT NULL,
    enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{queue}_name ON {queue}(queue, id)"),
    ]
}
