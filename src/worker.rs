//! Batch claim worker
//!
//! One poll loop per process. Each iteration claims a batch of unembedded
//! rows inside a transaction, embeds their contents in a single request and
//! finalizes the batch in that same transaction. Any failure rolls the claim
//! back, so rows are either fully embedded or left for the next claimant.

use crate::config::WorkerConfig;
use crate::embed::{embed_exact, Embedder};
use crate::error::Result;
use crate::frame::content_hash;
use crate::store::{RowUpdate, WorkStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one claim-embed-finalize pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Nothing to claim
    Idle,
    /// Rows embedded and committed
    Embedded(usize),
}

/// Totals for a worker run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub iterations: u64,
    pub batches: u64,
    pub rows_embedded: u64,
    pub failures: u64,
}

pub struct BatchClaimWorker {
    config: WorkerConfig,
    store: Arc<dyn WorkStore>,
    embedder: Arc<dyn Embedder>,
}

impl BatchClaimWorker {
    pub fn new(config: WorkerConfig, store: Arc<dyn WorkStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            store,
            embedder,
        }
    }

    /// Claim, embed and finalize one batch
    pub async fn run_once(&self) -> Result<IterationOutcome> {
        let claim = self.store.claim_batch(self.config.batch_size).await?;
        if claim.is_empty() {
            claim.release().await?;
            return Ok(IterationOutcome::Idle);
        }

        let texts: Vec<String> = claim.rows().iter().map(|r| r.content.clone()).collect();
        let embeddings = match embed_exact(self.embedder.as_ref(), texts).await {
            Ok(embeddings) => embeddings,
            Err(e) => {
                if let Err(rollback) = claim.release().await {
                    warn!(error = %rollback, "Rollback after embedding failure failed");
                }
                return Err(e);
            }
        };

        let updates: Vec<RowUpdate> = claim
            .rows()
            .iter()
            .zip(embeddings)
            .map(|(row, embedding)| RowUpdate {
                time: row.time,
                id: row.id.clone(),
                embedding,
                content_hash: if self.config.hash_content && row.content_hash.is_none() {
                    Some(content_hash(&row.content))
                } else {
                    None
                },
            })
            .collect();

        let updated = claim.finalize(updates).await?;
        Ok(IterationOutcome::Embedded(updated))
    }

    /// Poll until cancelled or `max_iterations` is reached
    pub async fn run_loop(&self, cancel: CancellationToken) -> Result<WorkerReport> {
        let mut report = WorkerReport::default();
        info!(
            backend = self.store.backend(),
            table = self.store.table(),
            embedder = self.embedder.name(),
            batch_size = self.config.batch_size,
            "Worker started"
        );

        while !cancel.is_cancelled() && !self.reached_limit(&report) {
            report.iterations += 1;

            let pause = match self.run_once().await {
                Ok(IterationOutcome::Embedded(rows)) => {
                    report.batches += 1;
                    report.rows_embedded += rows as u64;
                    info!(rows, iteration = report.iterations, "Embedded batch");
                    None
                }
                Ok(IterationOutcome::Idle) => {
                    debug!(iteration = report.iterations, "No pending rows");
                    self.touch_health_file();
                    Some(self.config.poll_interval())
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(iteration = report.iterations, error = %e, "Worker iteration failed");
                    Some(self.config.recovery_delay())
                }
            };

            if let Some(delay) = pause {
                if self.reached_limit(&report) {
                    break;
                }
                if !sleep_or_cancel(delay, &cancel).await {
                    break;
                }
            }
        }

        info!(
            iterations = report.iterations,
            batches = report.batches,
            rows_embedded = report.rows_embedded,
            failures = report.failures,
            "Worker stopped"
        );
        Ok(report)
    }

    fn reached_limit(&self, report: &WorkerReport) -> bool {
        self.config
            .max_iterations
            .is_some_and(|max| report.iterations >= max)
    }

    /// Best-effort liveness marker
    fn touch_health_file(&self) {
        let Some(path) = &self.config.health_file else {
            return;
        };
        if let Err(e) = std::fs::write(path, Utc::now().to_rfc3339()) {
            warn!(path = %path.display(), error = %e, "Cannot write health file");
        }
    }
}

/// Sleep for `delay`; false when the token fired first
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
