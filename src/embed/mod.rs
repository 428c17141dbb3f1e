//! Embedding generation
//!
//! The worker and the segment processor talk to an embedding service through
//! the [`Embedder`] trait. The only production backend is [`HttpEmbedder`].

mod http_backend;

pub use http_backend::*;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in input order
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Expected vector dimension, when known
    fn dimension(&self) -> Option<usize>;

    /// Human-readable backend name for logs
    fn name(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(HttpEmbedder::new(config)?))
}

/// Embed `texts` and insist on exactly one vector per text
pub async fn embed_exact(embedder: &dyn Embedder, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
    let expected = texts.len();
    let embeddings = embedder.embed(texts).await?;
    if embeddings.len() != expected {
        return Err(Error::EmbeddingCountMismatch {
            expected,
            actual: embeddings.len(),
        });
    }
    Ok(embeddings)
}

/// Check every vector against the expected dimension
pub fn validate_dimensions(embeddings: &[Vec<f32>], expected: Option<usize>) -> Result<()> {
    let Some(dimension) = expected else {
        return Ok(());
    };
    if let Some(mismatch) = embeddings.iter().find(|v| v.len() != dimension) {
        return Err(Error::Embedding(format!(
            "Embedding dimension mismatch: expected {}, got {}",
            dimension,
            mismatch.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder {
        returned: usize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![0.0; 3]; self.returned])
        }

        fn dimension(&self) -> Option<usize> {
            Some(3)
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_embed_exact_rejects_count_mismatch() {
        let texts: Vec<String> = (0..6).map(|i| format!("t{i}")).collect();

        let ok = embed_exact(&FixedEmbedder { returned: 6 }, texts.clone()).await;
        assert_eq!(ok.unwrap().len(), 6);

        let err = embed_exact(&FixedEmbedder { returned: 5 }, texts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::EmbeddingCountMismatch {
                expected: 6,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_validate_dimensions() {
        let vectors = vec![vec![0.0; 4], vec![0.0; 4]];
        assert!(validate_dimensions(&vectors, None).is_ok());
        assert!(validate_dimensions(&vectors, Some(4)).is_ok());
        assert!(validate_dimensions(&vectors, Some(3)).is_err());
    }
}
