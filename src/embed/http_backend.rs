use super::{validate_dimensions, Embedder};
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Longest slice of an error body kept in error messages
const ERROR_BODY_LIMIT: usize = 512;

/// Key the texts are sent under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFormat {
    /// `{"texts": [...]}`
    Texts,
    /// `{"inputs": [...]}`
    Inputs,
}

impl FromStr for RequestFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "texts" => Ok(RequestFormat::Texts),
            "inputs" => Ok(RequestFormat::Inputs),
            _ => Err(Error::Config(format!("Unknown embedding request format: {}", s))),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum EmbedRequest<'a> {
    Texts { texts: &'a [String] },
    Inputs { inputs: &'a [String] },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Embeddings { embeddings: Vec<Vec<f32>> },
    Vectors { vectors: Vec<Vec<f32>> },
    Data { data: Vec<EmbeddingData> },
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
            EmbeddingResponse::Vectors { vectors } => vectors,
            EmbeddingResponse::Data { data } => data.into_iter().map(|d| d.embedding).collect(),
        }
    }
}

/// Embedding service reached over HTTP
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    format: RequestFormat,
    dimension: Option<usize>,
    retry: RetryPolicy,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            format: config.request_format.parse()?,
            dimension: config.dimension,
            retry: RetryPolicy::from_config(&config.retry),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = match self.format {
            RequestFormat::Texts => EmbedRequest::Texts { texts },
            RequestFormat::Inputs => EmbedRequest::Inputs { inputs: texts },
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let mut detail = response.text().await.unwrap_or_default();
            if detail.len() > ERROR_BODY_LIMIT {
                let mut cut = ERROR_BODY_LIMIT;
                while !detail.is_char_boundary(cut) {
                    cut -= 1;
                }
                detail.truncate(cut);
            }
            return Err(Error::Embedding(format!(
                "Embedding service returned {}: {}",
                status, detail
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Malformed embedding response: {}", e)))?;
        Ok(parsed.into_embeddings())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(count = texts.len(), endpoint = %self.endpoint, "Requesting embeddings");
        let embeddings =
            retry_with_backoff(&self.retry, "embed", || self.send_once(&texts)).await?;
        validate_dimensions(&embeddings, self.dimension)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn name(&self) -> &str {
        self.endpoint.as_str()
    }
}
