//! Segment reader
//!
//! Streams frames back out of segment files:
//! - [`FrameReader`]: lazy, single-pass iterator with strict or lenient error handling
//! - [`FrameFilter`]: per-frame filtering by session, user, role and time window
//! - [`GapTracker`]: detects jumps in `seq` per file
//! - [`scan_segments`]: reads many files into a [`FrameSink`], collecting stats

pub mod emit;

pub use emit::*;

use crate::error::{FrameDecodeError, Result};
use crate::frame::{decode_from, Frame, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How decode failures end a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Yield the error once, then end
    Strict,
    /// End silently at the first failure
    Lenient,
}

/// Lazy sequence of frames decoded from a byte stream.
///
/// Corruption invalidates the remainder of the stream: after the first
/// failure no further frames are produced.
pub struct FrameReader<R> {
    inner: R,
    offset: u64,
    mode: ReadMode,
    done: bool,
    error: Option<FrameDecodeError>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, mode: ReadMode) -> Self {
        Self {
            inner,
            offset: 0,
            mode,
            done: false,
            error: None,
        }
    }

    /// Byte offset just past the last frame returned
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The failure that ended the stream, in either mode
    pub fn error(&self) -> Option<&FrameDecodeError> {
        self.error.as_ref()
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = std::result::Result<Frame, FrameDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match decode_from(&mut self.inner, self.offset) {
            Ok(Some((frame, consumed))) => {
                self.offset += consumed as u64;
                Some(Ok(frame))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.error = Some(e.clone());
                match self.mode {
                    ReadMode::Strict => Some(Err(e)),
                    ReadMode::Lenient => None,
                }
            }
        }
    }
}

/// Open a segment file for streaming
pub fn read_frames(path: &Path, mode: ReadMode) -> Result<FrameReader<BufReader<File>>> {
    let file = File::open(path)?;
    debug!(path = %path.display(), ?mode, "Opened segment");
    Ok(FrameReader::new(BufReader::new(file), mode))
}

/// Result of a full forward scan over one segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentScan {
    /// Frames decoded before the end or the first failure
    pub frames: u64,
    /// Highest `seq` seen, -1 if none
    pub last_seq: i64,
    /// Length of the decodable prefix
    pub valid_len: u64,
    /// Length of the file on disk
    pub file_len: u64,
    /// Failure that ended the scan, if any
    pub error: Option<FrameDecodeError>,
}

impl SegmentScan {
    /// True when the file ends in a partially written frame
    pub fn has_torn_tail(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.is_truncation())
    }
}

/// Scan a segment end to end. A missing file scans as empty.
pub fn scan_segment(path: &Path) -> Result<SegmentScan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(SegmentScan {
                last_seq: -1,
                ..Default::default()
            })
        }
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();

    let mut reader = FrameReader::new(BufReader::new(file), ReadMode::Lenient);
    let mut scan = SegmentScan {
        last_seq: -1,
        file_len,
        ..Default::default()
    };
    for frame in reader.by_ref().flatten() {
        scan.frames += 1;
        if let Some(seq) = frame.seq {
            scan.last_seq = scan.last_seq.max(seq);
        }
    }
    scan.valid_len = reader.offset();
    scan.error = reader.error().cloned();
    Ok(scan)
}

/// Frame predicate applied while streaming
#[derive(Debug, Clone, Default)]
pub struct FrameFilter {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub role: Option<Role>,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
}

impl FrameFilter {
    pub fn matches(&self, frame: &Frame) -> bool {
        if let Some(session) = &self.session_id {
            if &frame.session_id != session {
                return false;
            }
        }
        if let Some(user) = &self.user_id {
            if &frame.user_id != user {
                return false;
            }
        }
        if let Some(role) = self.role {
            if frame.role != role {
                return false;
            }
        }
        if let Some(since) = self.since {
            if frame.time < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if frame.time >= until {
                return false;
            }
        }
        true
    }
}

/// A jump in sequence numbers within one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub file: String,
    pub last_seq: i64,
    pub seq: i64,
}

/// Tracks the last seen `seq` per file
#[derive(Debug, Default)]
pub struct GapTracker {
    last: HashMap<String, i64>,
    gaps: Vec<Gap>,
}

impl GapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame's sequence number; frames without one are ignored
    pub fn observe(&mut self, file: &str, seq: Option<i64>) {
        let Some(seq) = seq else {
            return;
        };

        if let Some(&last) = self.last.get(file) {
            if seq != last + 1 {
                self.gaps.push(Gap {
                    file: file.to_string(),
                    last_seq: last,
                    seq,
                });
            }
        }
        self.last.insert(file.to_string(), seq);
    }

    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    pub fn into_gaps(self) -> Vec<Gap> {
        self.gaps
    }
}

/// Diagnostic counts over emitted frames
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadStats {
    pub total: u64,
    pub per_session: BTreeMap<String, u64>,
}

impl ReadStats {
    pub fn record(&mut self, frame: &Frame) {
        self.total += 1;
        *self.per_session.entry(frame.session_id.clone()).or_insert(0) += 1;
    }
}

/// A file whose stream ended with an error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileError {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of reading several segments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadReport {
    pub stats: ReadStats,
    pub gaps: Vec<Gap>,
    pub errors: Vec<FileError>,
}

/// Options for [`scan_segments`]
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub mode: ReadMode,
    pub filter: FrameFilter,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            mode: ReadMode::Strict,
            filter: FrameFilter::default(),
        }
    }
}

/// Read every path in order, writing matching frames to `sink`.
///
/// Decode and open failures are recorded per file and do not stop the
/// remaining files. Only sink write failures abort the scan.
pub fn scan_segments<W: Write>(
    paths: &[PathBuf],
    options: &ReadOptions,
    sink: &mut FrameSink<W>,
) -> Result<ReadReport> {
    let mut report = ReadReport::default();
    let mut gaps = GapTracker::new();

    for path in paths {
        let file_label = path.display().to_string();

        let reader = match read_frames(path, options.mode) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot open segment");
                report.errors.push(FileError {
                    path: path.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        for item in reader {
            match item {
                Ok(frame) => {
                    gaps.observe(&file_label, frame.seq);
                    if options.filter.matches(&frame) {
                        sink.write_frame(&frame)?;
                        report.stats.record(&frame);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Segment stream ended early");
                    report.errors.push(FileError {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    sink.flush()?;
    report.gaps = gaps.into_gaps();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;
    use chrono::{Duration, TimeZone};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn frame(session: &str, role: Role, seq: Option<i64>, minute: u32) -> Frame {
        let f = Frame::new(session, "u1", role, format!("message {minute}"))
            .with_time(Utc.with_ymd_and_hms(2025, 1, 1, 10, minute, 0).unwrap());
        match seq {
            Some(s) => f.with_seq(s),
            None => f,
        }
    }

    fn stream(frames: &[Frame]) -> (Vec<u8>, Vec<u64>) {
        let mut bytes = Vec::new();
        let mut boundaries = vec![0u64];
        for f in frames {
            bytes.extend(encode(f).unwrap());
            boundaries.push(bytes.len() as u64);
        }
        (bytes, boundaries)
    }

    #[test]
    fn test_reader_yields_frames_in_order() {
        let frames: Vec<Frame> = (0..3).map(|i| frame("abc", Role::User, Some(i), i as u32)).collect();
        let (bytes, boundaries) = stream(&frames);

        let mut reader = FrameReader::new(Cursor::new(bytes), ReadMode::Strict);
        let decoded: Vec<Frame> = reader.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(decoded, frames);
        assert_eq!(reader.offset(), *boundaries.last().unwrap());
        assert!(reader.error().is_none());
    }

    #[test]
    fn test_truncation_at_every_interior_offset_stops_at_last_complete_frame() {
        let frames: Vec<Frame> = (0..3).map(|i| frame("abc", Role::User, Some(i), i as u32)).collect();
        let (bytes, boundaries) = stream(&frames);

        for cut in 1..bytes.len() as u64 {
            if boundaries.contains(&cut) {
                continue;
            }
            let complete = boundaries.iter().filter(|&&b| b > 0 && b <= cut).count();
            let truncated = bytes[..cut as usize].to_vec();

            let results: Vec<_> =
                FrameReader::new(Cursor::new(truncated), ReadMode::Strict).collect();
            assert_eq!(results.len(), complete + 1, "cut at {cut}");
            for (i, r) in results[..complete].iter().enumerate() {
                assert_eq!(r.as_ref().unwrap(), &frames[i]);
            }
            let err = results[complete].as_ref().unwrap_err();
            assert!(err.is_truncation(), "cut at {cut}: {err:?}");
            assert_eq!(err.offset(), boundaries[complete]);
        }
    }

    #[test]
    fn test_lenient_mode_ends_silently_but_keeps_error() {
        let frames = vec![frame("abc", Role::User, Some(0), 0), frame("abc", Role::User, Some(1), 1)];
        let (mut bytes, boundaries) = stream(&frames);
        bytes.truncate(boundaries[1] as usize + 2);

        let mut reader = FrameReader::new(Cursor::new(bytes), ReadMode::Lenient);
        let items: Vec<_> = reader.by_ref().collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
        assert_eq!(
            reader.error(),
            Some(&FrameDecodeError::TruncatedHeader { offset: boundaries[1] })
        );
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_gap_detection_reports_single_jump() {
        let mut tracker = GapTracker::new();
        for seq in [0, 1, 2, 5, 6] {
            tracker.observe("session_abc.log", Some(seq));
        }
        tracker.observe("session_abc.log", None);
        assert_eq!(
            tracker.gaps(),
            &[Gap {
                file: "session_abc.log".to_string(),
                last_seq: 2,
                seq: 5
            }]
        );
    }

    #[test]
    fn test_gap_tracking_is_per_file() {
        let mut tracker = GapTracker::new();
        tracker.observe("a.log", Some(0));
        tracker.observe("b.log", Some(10));
        tracker.observe("a.log", Some(1));
        tracker.observe("b.log", Some(11));
        assert!(tracker.gaps().is_empty());
    }

    #[test]
    fn test_filter_bounds_are_inclusive_exclusive() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let filter = FrameFilter {
            since: Some(base + Duration::minutes(1)),
            until: Some(base + Duration::minutes(3)),
            ..Default::default()
        };
        let matched: Vec<u32> = (0..5)
            .filter(|&m| filter.matches(&frame("abc", Role::User, None, m)))
            .collect();
        assert_eq!(matched, vec![1, 2]);
    }

    #[test]
    fn test_filter_by_session_user_and_role() {
        let filter = FrameFilter {
            session_id: Some("abc".to_string()),
            role: Some(Role::Assistant),
            ..Default::default()
        };
        assert!(filter.matches(&frame("abc", Role::Assistant, None, 0)));
        assert!(!filter.matches(&frame("abc", Role::User, None, 0)));
        assert!(!filter.matches(&frame("xyz", Role::Assistant, None, 0)));

        let by_user = FrameFilter {
            user_id: Some("someone-else".to_string()),
            ..Default::default()
        };
        assert!(!by_user.matches(&frame("abc", Role::User, None, 0)));
    }

    #[test]
    fn test_scan_segment_reports_last_seq_and_torn_tail() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session_abc.logtmp");
        let frames = vec![
            frame("abc", Role::User, Some(3), 0),
            frame("abc", Role::User, Some(4), 1),
        ];
        let (mut bytes, boundaries) = stream(&frames);
        bytes.extend_from_slice(&[0, 0, 0, 9, 1]);
        std::fs::write(&path, &bytes).unwrap();

        let scan = scan_segment(&path).unwrap();
        assert_eq!(scan.frames, 2);
        assert_eq!(scan.last_seq, 4);
        assert_eq!(scan.valid_len, boundaries[2]);
        assert_eq!(scan.file_len, bytes.len() as u64);
        assert!(scan.has_torn_tail());

        let missing = scan_segment(&tmp.path().join("absent.logtmp")).unwrap();
        assert_eq!(missing.last_seq, -1);
        assert_eq!(missing.frames, 0);
    }

    #[test]
    fn test_scan_segments_isolates_file_errors() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("session_a.log");
        let bad = tmp.path().join("session_b.log");
        let frames_a = vec![frame("a", Role::User, Some(0), 0), frame("a", Role::User, Some(2), 1)];
        let frames_b = vec![frame("b", Role::System, Some(0), 2)];
        std::fs::write(&good, stream(&frames_a).0).unwrap();
        let mut corrupt = stream(&frames_b).0;
        corrupt.extend_from_slice(&[0, 0, 0, 2, 0xff, 0xff]);
        std::fs::write(&bad, corrupt).unwrap();

        let paths = vec![bad.clone(), tmp.path().join("missing.log"), good.clone()];
        let mut sink = FrameSink::new(Vec::new(), OutputFormat::Jsonl);
        let report = scan_segments(&paths, &ReadOptions::default(), &mut sink).unwrap();

        assert_eq!(report.stats.total, 3);
        assert_eq!(report.stats.per_session.get("a"), Some(&2));
        assert_eq!(report.stats.per_session.get("b"), Some(&1));
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].path, bad);
        assert_eq!(
            report.gaps,
            vec![Gap {
                file: good.display().to_string(),
                last_seq: 0,
                seq: 2
            }]
        );

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(output.lines().count(), 3);
    }

    #[test]
    fn test_same_basename_in_two_dirs_tracks_gaps_separately() {
        let tmp = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for dir in ["a", "b"] {
            std::fs::create_dir(tmp.path().join(dir)).unwrap();
            let path = tmp.path().join(dir).join("session_x.log");
            let frames = vec![frame("x", Role::User, Some(0), 0), frame("x", Role::User, Some(1), 1)];
            std::fs::write(&path, stream(&frames).0).unwrap();
            paths.push(path);
        }

        let mut sink = FrameSink::new(Vec::new(), OutputFormat::Jsonl);
        let report = scan_segments(&paths, &ReadOptions::default(), &mut sink).unwrap();

        assert_eq!(report.stats.total, 4);
        assert!(report.gaps.is_empty(), "unexpected gaps: {:?}", report.gaps);
    }
}
