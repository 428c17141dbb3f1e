//! Process command implementation

use crate::error::{Error, Result};
use crate::processor::SegmentProcessor;
use crate::progress::segment_progress;
use crate::queue::SegmentQueue;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub paths: Vec<PathBuf>,
    /// Drain the segment queue after the explicit paths
    pub from_queue: bool,
    /// Embed frames before inserting
    pub embed: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessStats {
    pub segments: usize,
    pub rows: usize,
    pub failures: Vec<SegmentFailure>,
}

/// Process explicit paths, then (with `from_queue`) every queued segment.
///
/// A failing segment is recorded and skipped. Segments that came off the
/// queue are pushed back once the drain finishes.
pub async fn cmd_process(
    processor: &SegmentProcessor,
    queue: &dyn SegmentQueue,
    options: &ProcessOptions,
) -> Result<ProcessStats> {
    if options.dry_run && options.from_queue {
        return Err(Error::Config(
            "--dry-run cannot be combined with --from-queue".to_string(),
        ));
    }

    let mut stats = ProcessStats::default();

    let bar = segment_progress(options.paths.len() as u64);
    for path in &options.paths {
        bar.set_message(path.display().to_string());
        process_one(processor, path, options, &mut stats).await;
        bar.inc(1);
    }
    bar.finish_and_clear();

    if options.from_queue {
        let mut requeue = Vec::new();
        while let Some(path) = queue.pop().await? {
            if !process_one(processor, &path, options, &mut stats).await {
                requeue.push(path);
            }
        }
        for path in requeue {
            if let Err(e) = queue.push(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to requeue segment");
            }
        }
    }

    info!(
        segments = stats.segments,
        rows = stats.rows,
        failures = stats.failures.len(),
        "Processing complete"
    );
    Ok(stats)
}

async fn process_one(
    processor: &SegmentProcessor,
    path: &std::path::Path,
    options: &ProcessOptions,
    stats: &mut ProcessStats,
) -> bool {
    match processor.process(path, options.embed, options.dry_run).await {
        Ok(rows) => {
            stats.segments += 1;
            stats.rows += rows;
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Segment failed");
            stats.failures.push(SegmentFailure {
                path: path.to_path_buf(),
                error: e.to_string(),
            });
            false
        }
    }
}

pub fn print_process_stats(stats: &ProcessStats, dry_run: bool) {
    let verb = if dry_run { "would insert" } else { "inserted" };
    println!("\n✓ Processing complete");
    println!("  Segments: {}", stats.segments);
    println!("  Rows {}: {}", verb, stats.rows);
    for failure in &stats.failures {
        eprintln!("[error] {}: {}", failure.path.display(), failure.error);
    }
}
