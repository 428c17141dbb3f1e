//! Segment queue: where sealed segment paths are handed off
//!
//! The writer pushes every sealed path; `process --from-queue` pops them.

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::store::WorkStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// FIFO list of sealed segment paths
#[async_trait]
pub trait SegmentQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Hand off a sealed segment
    async fn push(&self, path: &Path) -> Result<()>;

    /// Take the oldest sealed segment, if any
    async fn pop(&self) -> Result<Option<PathBuf>>;
}

/// Only logs sealed paths; nothing can be popped
pub struct LogOnlyQueue {
    name: String,
}

impl LogOnlyQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl SegmentQueue for LogOnlyQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, path: &Path) -> Result<()> {
        info!(queue = %self.name, path = %path.display(), "Sealed segment ready");
        Ok(())
    }

    async fn pop(&self) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Named list kept in the work store's queue table
pub struct StoreSegmentQueue {
    store: Arc<dyn WorkStore>,
    name: String,
}

impl StoreSegmentQueue {
    pub fn new(store: Arc<dyn WorkStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }
}

#[async_trait]
impl SegmentQueue for StoreSegmentQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, path: &Path) -> Result<()> {
        let text = path
            .to_str()
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
        self.store
            .enqueue_segment(&self.name, text)
            .await
            .map_err(|e| Error::Queue(format!("push to {} failed: {}", self.name, e)))?;
        debug!(queue = %self.name, path = %text, "Pushed sealed segment");
        Ok(())
    }

    async fn pop(&self) -> Result<Option<PathBuf>> {
        let path = self
            .store
            .dequeue_segment(&self.name)
            .await
            .map_err(|e| Error::Queue(format!("pop from {} failed: {}", self.name, e)))?;
        Ok(path.map(PathBuf::from))
    }
}

/// Build the queue named by `[queue]`. The database backend needs a store.
pub fn create_queue(
    config: &QueueConfig,
    store: Option<Arc<dyn WorkStore>>,
) -> Result<Arc<dyn SegmentQueue>> {
    match config.backend.as_str() {
        "log" => Ok(Arc::new(LogOnlyQueue::new(&config.name))),
        "database" => {
            let store = store.ok_or_else(|| {
                Error::Config("queue.backend = \"database\" requires database.url".to_string())
            })?;
            Ok(Arc::new(StoreSegmentQueue::new(store, &config.name)))
        }
        other => Err(Error::Config(format!("Unknown queue backend: {}", other))),
    }
}
