//! Session log writer
//!
//! Appends frames to a per-session open segment (`session_<id>.logtmp`).
//! Before each append the rotation policy is checked; a segment past its
//! size or age threshold is sealed (renamed to `session_<id>.log`) and its
//! path handed to the [`SegmentQueue`].

mod rotation;

pub use rotation::*;

use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::frame::{
    decode_payload, encode, Frame, Metadata, Role, FRAME_VERSION, LENGTH_PREFIX_LEN,
};
use crate::queue::SegmentQueue;
use crate::reader::scan_segment;
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// How the frame's `seq` is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeqMode {
    /// Frame carries no sequence number
    #[default]
    None,
    Explicit(i64),
    /// One past the highest sequence number already logged for the session
    Auto,
}

/// One append call
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub seq: SeqMode,
    pub metadata: Metadata,
    /// fsync the data before returning
    pub durable: bool,
}

impl AppendRequest {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            role,
            content: content.into(),
            seq: SeqMode::None,
            metadata: Metadata::new(),
            durable: false,
        }
    }

    pub fn with_seq(mut self, seq: SeqMode) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }
}

/// Outcome of an append
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendResult {
    /// Open segment the frame went into
    pub segment_path: PathBuf,
    /// Size of that segment after the append
    pub size_bytes: u64,
    pub seq_used: Option<i64>,
    /// Segment sealed by this call, if rotation triggered
    pub sealed: Option<PathBuf>,
}

/// Appends frames to per-session segments
pub struct SessionLogWriter {
    config: LogConfig,
    policy: RotationPolicy,
    queue: Arc<dyn SegmentQueue>,
}

impl SessionLogWriter {
    pub fn new(config: LogConfig, queue: Arc<dyn SegmentQueue>) -> Self {
        let policy = RotationPolicy::from_config(&config);
        Self {
            config,
            policy,
            queue,
        }
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Open segment path for an already sanitized session id
    pub fn open_path(&self, session_id: &str) -> PathBuf {
        self.config.dir.join(format!("session_{}.logtmp", session_id))
    }

    /// Append one frame, sealing the current segment first when due
    pub async fn append(&self, request: AppendRequest) -> Result<AppendResult> {
        let session = sanitize_session_id(&request.session_id, self.config.max_session_id_len);
        fs::create_dir_all(&self.config.dir)?;
        let open_path = self.open_path(&session);

        let seq = match request.seq {
            SeqMode::None => None,
            SeqMode::Explicit(seq) => Some(seq),
            SeqMode::Auto => Some(self.next_sequence(&session, &open_path)?),
        };

        let sealed = if self.policy.evaluate(&open_path)? {
            Some(self.seal_and_hand_off(&session, &open_path).await?)
        } else {
            None
        };

        let frame = Frame {
            version: FRAME_VERSION,
            time: Utc::now(),
            session_id: session.clone(),
            user_id: request.user_id,
            role: request.role,
            seq,
            content: request.content,
            metadata: request.metadata,
        };
        let bytes = encode(&frame)?;
        let durable = request.durable || self.config.fsync;
        let size_bytes = append_bytes(&open_path, &bytes, durable)?;

        debug!(
            session = %session,
            seq = ?seq,
            frame_bytes = bytes.len(),
            size_bytes,
            "Appended frame"
        );

        Ok(AppendResult {
            segment_path: open_path,
            size_bytes,
            seq_used: seq,
            sealed,
        })
    }

    /// Seal the open segment and hand it to the queue
    async fn seal_and_hand_off(&self, session: &str, open_path: &Path) -> Result<PathBuf> {
        let target = sealed_target(&self.config.dir, session);
        seal_segment(open_path, &target)?;
        info!(session = %session, path = %target.display(), "Rotated segment");

        if let Err(e) = self.queue.push(&target).await {
            if self.config.strict_handoff {
                return Err(Error::RotationHandoff {
                    path: target,
                    reason: e.to_string(),
                });
            }
            warn!(
                path = %target.display(),
                queue = self.queue.name(),
                error = %e,
                "Sealed segment was not handed off"
            );
        }
        Ok(target)
    }

    /// One past the last logged sequence number for `session`.
    ///
    /// Reads the open segment, or the newest sealed segment when no open
    /// one exists. A partially written trailing frame in the open segment
    /// is cut off so later frames stay readable.
    fn next_sequence(&self, session: &str, open_path: &Path) -> Result<i64> {
        let scan = scan_segment(open_path)?;

        if let Some(damage) = scan.error.as_ref().filter(|e| e.is_truncation()) {
            if tail_holds_intact_frame(open_path, scan.valid_len)? {
                warn!(
                    path = %open_path.display(),
                    offset = damage.offset(),
                    "Intact frames follow a damaged frame, not truncating"
                );
                return Err(Error::FrameDecode(damage.clone()));
            }
            warn!(
                path = %open_path.display(),
                valid_len = scan.valid_len,
                dropped_bytes = scan.file_len - scan.valid_len,
                "Truncating partially written frame"
            );
            OpenOptions::new()
                .write(true)
                .open(open_path)?
                .set_len(scan.valid_len)?;
        }

        let last = if open_path.exists() {
            scan.last_seq
        } else {
            match self.newest_sealed(session)? {
                Some(sealed) => discover_last_sequence(&sealed)?,
                None => -1,
            }
        };
        Ok(last + 1)
    }

    /// Most recently modified sealed segment of `session`
    fn newest_sealed(&self, session: &str) -> Result<Option<PathBuf>> {
        let exact = format!("session_{}.log", session);
        let prefix = format!("session_{}.", session);

        let entries = match fs::read_dir(&self.config.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_sealed = name == exact || (name.starts_with(&prefix) && name.ends_with(".log"));
            if !is_sealed {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
                newest = Some((modified, entry.path()));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }
}

fn append_bytes(path: &Path, bytes: &[u8], durable: bool) -> Result<u64> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(bytes)?;
    if durable {
        file.sync_data()?;
    }
    Ok(file.metadata()?.len())
}

/// Whether a decodable frame starts anywhere after the first byte of the
/// damaged region at `valid_len`. A torn write leaves only a prefix of one
/// frame; a corrupted length prefix leaves whole frames behind it.
fn tail_holds_intact_frame(path: &Path, valid_len: u64) -> Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(valid_len))?;
    let mut tail = Vec::new();
    file.read_to_end(&mut tail)?;

    for start in 1..tail.len() {
        let rest = &tail[start..];
        if rest.len() <= LENGTH_PREFIX_LEN {
            break;
        }
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if len == 0 || LENGTH_PREFIX_LEN + len > rest.len() {
            continue;
        }
        let payload = &rest[LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + len];
        if decode_payload(payload, valid_len + start as u64).is_ok() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Highest `seq` in a segment; -1 when the file is absent, empty, or its
/// first frame cannot be decoded
pub fn discover_last_sequence(path: &Path) -> Result<i64> {
    Ok(scan_segment(path)?.last_seq)
}

fn disallowed_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("character class is valid"))
}

/// Make a session id safe for use in a file name
pub fn sanitize_session_id(raw: &str, max_len: usize) -> String {
    let replaced = disallowed_chars().replace_all(raw, "-");
    let trimmed = replaced.trim_matches('-');
    let truncated = &trimmed[..trimmed.len().min(max_len)];
    let result = truncated.trim_end_matches('-');

    if result.is_empty() {
        "anonymous".to_string()
    } else {
        result.to_string()
    }
}
