//! Segment processor
//!
//! Turns a sealed segment into work rows: decode every frame, optionally
//! embed them all in one request, and bulk insert. Row ids are derived from
//! the frame, so processing the same segment twice inserts nothing new.

use crate::embed::{embed_exact, Embedder};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::reader::{read_frames, ReadMode};
use crate::store::{NewWorkRow, WorkStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub struct SegmentProcessor {
    store: Option<Arc<dyn WorkStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    hash_content: bool,
}

impl SegmentProcessor {
    pub fn new(
        store: Option<Arc<dyn WorkStore>>,
        embedder: Option<Arc<dyn Embedder>>,
        hash_content: bool,
    ) -> Self {
        Self {
            store,
            embedder,
            hash_content,
        }
    }

    /// Process one sealed segment.
    ///
    /// Returns the number of rows inserted, or with `dry_run` the number of
    /// frames that would be offered for insertion.
    pub async fn process(&self, path: &Path, immediate_embed: bool, dry_run: bool) -> Result<usize> {
        let frames = read_all(path)?;
        debug!(path = %path.display(), frames = frames.len(), "Decoded segment");

        let embeddings = if immediate_embed && !frames.is_empty() {
            let embedder = self.embedder.as_ref().ok_or_else(|| {
                Error::Config("immediate embedding requested without an embedder".to_string())
            })?;
            let texts = frames.iter().map(|f| f.content.clone()).collect();
            Some(embed_exact(embedder.as_ref(), texts).await?)
        } else {
            None
        };

        let mut rows = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            let hash = self.hash_content.then(|| frame.content_hash());
            rows.push(NewWorkRow::from_frame(frame, index, hash)?);
        }
        if let Some(embeddings) = embeddings {
            for (row, embedding) in rows.iter_mut().zip(embeddings) {
                row.embedding = Some(embedding);
            }
        }

        if dry_run {
            info!(path = %path.display(), rows = rows.len(), "Dry run, nothing persisted");
            return Ok(rows.len());
        }

        let store = self.store.as_ref().ok_or_else(|| {
            Error::Config("database.url is required unless --dry-run is set".to_string())
        })?;
        let inserted = store.insert_rows(&rows).await?;
        info!(
            path = %path.display(),
            frames = rows.len(),
            inserted,
            embedded = immediate_embed,
            "Processed segment"
        );
        Ok(inserted)
    }
}

/// Decode a whole segment; the first decode error aborts it
fn read_all(path: &Path) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    for item in read_frames(path, ReadMode::Strict)? {
        frames.push(item?);
    }
    Ok(frames)
}
