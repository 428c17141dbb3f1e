//! Worker command implementation

use crate::config::Config;
use crate::embed::create_embedder;
use crate::error::Result;
use crate::store::WorkStore;
use crate::worker::{BatchClaimWorker, WorkerReport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Command-line overrides for `[worker]` and `[embedding]`
#[derive(Debug, Clone, Default)]
pub struct WorkerOverrides {
    pub batch_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub endpoint: Option<String>,
    pub max_iterations: Option<u64>,
    pub health_file: Option<PathBuf>,
}

impl WorkerOverrides {
    /// Apply onto a copy of `config` and re-validate it
    pub fn apply(&self, config: &Config) -> Result<Config> {
        let mut config = config.clone();
        if let Some(batch_size) = self.batch_size {
            config.worker.batch_size = batch_size;
        }
        if let Some(poll) = self.poll_interval_ms {
            config.worker.poll_interval_ms = poll;
        }
        if let Some(endpoint) = &self.endpoint {
            config.embedding.endpoint = endpoint.clone();
        }
        if self.max_iterations.is_some() {
            config.worker.max_iterations = self.max_iterations;
        }
        if self.health_file.is_some() {
            config.worker.health_file = self.health_file.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Run the batch claim worker until cancelled or out of iterations
pub async fn cmd_worker(
    config: &Config,
    store: Arc<dyn WorkStore>,
    cancel: CancellationToken,
) -> Result<WorkerReport> {
    let embedder = create_embedder(&config.embedding)?;
    let worker = BatchClaimWorker::new(config.worker.clone(), store, embedder);
    worker.run_loop(cancel).await
}

pub fn print_worker_report(report: &WorkerReport) {
    println!("\n✓ Worker stopped");
    println!("  Iterations: {}", report.iterations);
    println!("  Batches: {}", report.batches);
    println!("  Rows embedded: {}", report.rows_embedded);
    if report.failures > 0 {
        println!("  Failed iterations: {}", report.failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{open_test_store, NewWorkRow};
    use crate::frame::{Frame, Role};
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_overrides_apply_and_validate() {
        let overrides = WorkerOverrides {
            batch_size: Some(6),
            endpoint: Some("http://embed.local/v1".to_string()),
            max_iterations: Some(3),
            ..Default::default()
        };
        let config = overrides.apply(&Config::default()).unwrap();
        assert_eq!(config.worker.batch_size, 6);
        assert_eq!(config.embedding.endpoint, "http://embed.local/v1");
        assert_eq!(config.worker.max_iterations, Some(3));

        let zero = WorkerOverrides {
            batch_size: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.apply(&Config::default()).unwrap_err().exit_code(), 2);
    }

    #[tokio::test]
    async fn test_cmd_worker_embeds_pending_rows() {
        let tmp = TempDir::new().unwrap();
        let store = open_test_store(tmp.path()).await;
        let rows: Vec<NewWorkRow> = (0..3)
            .map(|i| {
                let frame = Frame::new("s", "u", Role::User, format!("row {i}"));
                NewWorkRow::from_frame(&frame, i, None).unwrap()
            })
            .collect();
        store.insert_rows(&rows).await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let overrides = WorkerOverrides {
            batch_size: Some(10),
            endpoint: Some(format!("{}/embed", server.uri())),
            max_iterations: Some(1),
            ..Default::default()
        };
        let config = overrides.apply(&Config::default()).unwrap();
        let report = cmd_worker(&config, store.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.rows_embedded, 3);
        assert_eq!(store.status().await.unwrap().embedded, 3);
    }
}
