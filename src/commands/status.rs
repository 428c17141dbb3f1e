//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::store::{redact_url, StoreStatus, WorkStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: Option<String>,
    pub log_dir: String,
    pub open_segments: usize,
    pub sealed_segments: usize,
    pub database_url: Option<String>,
    pub backend: Option<String>,
    pub table: String,
    pub queue: String,
    /// Row counts; absent when no store is configured
    pub store: Option<StoreStatus>,
}

/// Gather segment directory and work store status
pub async fn cmd_status(config: &Config, store: Option<&dyn WorkStore>) -> Result<StatusInfo> {
    info!("Getting status");

    let (open_segments, sealed_segments) = count_segments(&config.log.dir)?;

    let store_status = match store {
        Some(store) => Some(store.status().await?),
        None => {
            debug!("No work store configured");
            None
        }
    };

    Ok(StatusInfo {
        config_path: config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string()),
        log_dir: config.log.dir.display().to_string(),
        open_segments,
        sealed_segments,
        database_url: config.database.url.as_deref().map(redact_url),
        backend: store.map(|s| s.backend().to_string()),
        table: config.database.table.clone(),
        queue: format!("{} ({})", config.queue.name, config.queue.backend),
        store: store_status,
    })
}

/// Count `session_*.logtmp` and `session_*.log` files; a missing dir counts as empty
fn count_segments(dir: &Path) -> Result<(usize, usize)> {
    if !dir.exists() {
        return Ok((0, 0));
    }
    let mut open = 0;
    let mut sealed = 0;
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("session_") {
            continue;
        }
        if name.ends_with(".logtmp") {
            open += 1;
        } else if name.ends_with(".log") {
            sealed += 1;
        }
    }
    Ok((open, sealed))
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 seglog Status\n");
    println!(
        "Configuration: {}",
        status.config_path.as_deref().unwrap_or("(defaults)")
    );
    println!("\nSegments:");
    println!("  Directory: {}", status.log_dir);
    println!("  Open: {}", status.open_segments);
    println!("  Sealed: {}", status.sealed_segments);
    println!("  Queue: {}", status.queue);

    println!("\nWork store:");
    match (&status.database_url, &status.store) {
        (Some(url), Some(counts)) => {
            println!("  URL: {}", url);
            println!(
                "  Backend: {}",
                status.backend.as_deref().unwrap_or("unknown")
            );
            println!("  Table: {}", status.table);
            println!("  Pending rows: {}", counts.pending);
            println!("  Embedded rows: {}", counts.embedded);
            println!("  Queued segments: {}", counts.queued);
        }
        _ => println!("  ✗ Not configured (set database.url or DATABASE_URL)"),
    }
}
