//! Database management commands

use crate::error::Result;
use crate::store::{StoreStatus, WorkStore};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct DbInitInfo {
    pub backend: String,
    pub table: String,
    pub status: StoreStatus,
}

/// Create the work table and queue table (idempotent)
pub async fn cmd_db_init(store: &dyn WorkStore) -> Result<DbInitInfo> {
    store.init_schema().await?;
    let status = store.status().await?;
    info!(backend = store.backend(), table = store.table(), "Schema ready");
    Ok(DbInitInfo {
        backend: store.backend().to_string(),
        table: store.table().to_string(),
        status,
    })
}

pub fn print_db_init(info: &DbInitInfo) {
    println!("✓ {} schema ready", info.backend);
    println!("  Table: {}", info.table);
    println!(
        "  Rows: {} pending, {} embedded",
        info.status.pending, info.status.embedded
    );
}
