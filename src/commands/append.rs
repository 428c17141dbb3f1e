//! Append command implementation

use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::frame::{Metadata, Role};
use crate::queue::SegmentQueue;
use crate::writer::{AppendRequest, AppendResult, SeqMode, SessionLogWriter};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AppendOptions {
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub seq: SeqMode,
    /// `key=value` pairs
    pub meta: Vec<String>,
    pub durable: bool,
}

/// Append one frame to the session's open segment
pub async fn cmd_append(
    log: &LogConfig,
    queue: Arc<dyn SegmentQueue>,
    options: AppendOptions,
) -> Result<AppendResult> {
    let metadata = parse_meta(&options.meta)?;
    let writer = SessionLogWriter::new(log.clone(), queue);
    let request = AppendRequest::new(
        options.session_id,
        options.user_id,
        options.role,
        options.content,
    )
    .with_seq(options.seq)
    .with_metadata(metadata)
    .durable(options.durable);

    writer.append(request).await
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type,
/// anything else is stored as a string.
pub fn parse_meta(pairs: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("Invalid --meta '{}': expected key=value", pair)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config(format!("Invalid --meta '{}': empty key", pair)));
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

pub fn print_append_result(result: &AppendResult) {
    if let Some(sealed) = &result.sealed {
        println!("✓ Sealed {}", sealed.display());
    }
    match result.seq_used {
        Some(seq) => println!(
            "✓ Appended seq {} to {} ({} bytes)",
            seq,
            result.segment_path.display(),
            result.size_bytes
        ),
        None => println!(
            "✓ Appended to {} ({} bytes)",
            result.segment_path.display(),
            result.size_bytes
        ),
    }
}
