//! Frames: the atomic unit of a session log
//!
//! A frame is one conversational event. Frames are serialized as a CBOR map
//! behind a 4-byte big-endian length prefix (see [`codec`]).

pub mod codec;

pub use codec::*;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Wire version written by this crate
pub const FRAME_VERSION: u32 = 1;

/// Open metadata attached to a frame
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Speaker of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(Error::Config(format!("Unknown role: {}", s))),
        }
    }
}

/// One logged conversational event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub version: u32,
    pub time: DateTime<Utc>,
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Frame {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            version: FRAME_VERSION,
            time: Utc::now(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            role,
            seq: None,
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_seq(mut self, seq: i64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// BLAKE3 hex digest of the frame content
    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }
}

/// BLAKE3 hex digest used for `content_hash` columns
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("Assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!(Role::System.to_string(), "system");
        assert!("moderator".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::User).unwrap();
        assert_eq!(json, "\"user\"");
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = Frame::new("s", "u", Role::User, "hello");
        let b = Frame::new("other", "v", Role::System, "hello");
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
        assert_ne!(a.content_hash(), content_hash("hello!"));
    }

    #[test]
    fn test_seq_omitted_from_json_when_absent() {
        let frame = Frame::new("s", "u", Role::User, "hi");
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("seq").is_none());

        let json = serde_json::to_value(frame.with_seq(3)).unwrap();
        assert_eq!(json["seq"], 3);
    }
}
