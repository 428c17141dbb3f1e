//! Custom error types for seglog

use std::path::PathBuf;
use thiserror::Error;

/// Failure while decoding a single frame from a segment stream.
///
/// Offsets are byte positions of the start of the offending frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameDecodeError {
    #[error("truncated frame header at offset {offset}")]
    TruncatedHeader { offset: u64 },

    #[error("truncated frame payload at offset {offset}: expected {expected} bytes, found {available}")]
    TruncatedPayload {
        offset: u64,
        expected: usize,
        available: usize,
    },

    #[error("corrupt frame at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("read failed at offset {offset}: {reason}")]
    Io { offset: u64, reason: String },
}

impl FrameDecodeError {
    pub fn offset(&self) -> u64 {
        match self {
            FrameDecodeError::TruncatedHeader { offset }
            | FrameDecodeError::TruncatedPayload { offset, .. }
            | FrameDecodeError::Corrupt { offset, .. }
            | FrameDecodeError::Io { offset, .. } => *offset,
        }
    }

    /// True for header/payload truncation (as opposed to a malformed payload)
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            FrameDecodeError::TruncatedHeader { .. } | FrameDecodeError::TruncatedPayload { .. }
        )
    }
}

/// Main error type for seglog operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding count mismatch: sent {expected} texts, received {actual} vectors")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("Frame decode error: {0}")]
    FrameDecode(#[from] FrameDecodeError),

    #[error("Frame encode error: {0}")]
    FrameEncode(String),

    #[error("Segment {path} sealed but queue hand-off failed: {reason}")]
    RotationHandoff { path: PathBuf, reason: String },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Process exit code for this error when it reaches `main`
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::TomlParse(_) | Error::UrlParse(_) => 2,
            _ => 1,
        }
    }

    /// Whether a failed embedding request is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Embedding(_) => true,
            Error::Http(e) => !e.is_builder(),
            _ => false,
        }
    }
}

/// Result type alias for seglog
pub type Result<T> = std::result::Result<T, Error>;
