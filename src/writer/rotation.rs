//! Segment rotation policy and sealing

use crate::config::LogConfig;
use crate::error::Result;
use chrono::Utc;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// When an open segment should be sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Size trigger in bytes; 0 disables it
    pub max_bytes: u64,
    /// Age trigger; `None` disables it
    pub max_age: Option<Duration>,
}

impl RotationPolicy {
    pub fn new(max_bytes: u64, max_age: Option<Duration>) -> Self {
        Self { max_bytes, max_age }
    }

    pub fn from_config(config: &LogConfig) -> Self {
        Self::new(config.max_bytes, config.max_age())
    }

    /// True iff either threshold has been reached
    pub fn should_rotate(&self, size_bytes: u64, age: Duration) -> bool {
        let by_size = self.max_bytes > 0 && size_bytes >= self.max_bytes;
        let by_age = self.max_age.is_some_and(|max| age >= max);
        by_size || by_age
    }

    /// Evaluate the policy against a segment on disk.
    /// Missing and empty files never rotate.
    pub fn evaluate(&self, path: &Path) -> Result<bool> {
        let meta = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if meta.len() == 0 {
            return Ok(false);
        }
        Ok(self.should_rotate(meta.len(), segment_age(&meta)))
    }
}

/// Time since the segment was created (modification time where the
/// platform does not record creation)
fn segment_age(meta: &fs::Metadata) -> Duration {
    let born = meta
        .created()
        .or_else(|_| meta.modified())
        .unwrap_or_else(|_| SystemTime::now());
    SystemTime::now()
        .duration_since(born)
        .unwrap_or_default()
}

/// Pick the sealed name for a session: `session_<id>.log`, or a
/// timestamped variant when an unconsumed sealed segment already exists
pub fn sealed_target(dir: &Path, session_id: &str) -> PathBuf {
    let base = dir.join(format!("session_{}.log", session_id));
    if !base.exists() {
        return base;
    }

    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
    let mut candidate = dir.join(format!("session_{}.{}.log", session_id, stamp));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("session_{}.{}-{}.log", session_id, stamp, n));
        n += 1;
    }
    candidate
}

/// Flush the open segment and atomically rename it to `target`
pub fn seal_segment(open_path: &Path, target: &Path) -> Result<()> {
    File::open(open_path)?.sync_all()?;
    fs::rename(open_path, target)?;
    debug!(from = %open_path.display(), to = %target.display(), "Sealed segment");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_should_rotate_thresholds() {
        let policy = RotationPolicy::new(1024, Some(Duration::from_secs(60)));
        assert!(!policy.should_rotate(1023, Duration::from_secs(59)));
        assert!(policy.should_rotate(1024, Duration::ZERO));
        assert!(policy.should_rotate(10, Duration::from_secs(60)));
    }

    #[test]
    fn test_disabled_triggers() {
        let policy = RotationPolicy::new(0, None);
        assert!(!policy.should_rotate(u64::MAX, Duration::from_secs(u64::MAX / 2)));
    }

    #[test]
    fn test_evaluate_ignores_missing_and_empty_files() {
        let tmp = TempDir::new().unwrap();
        let policy = RotationPolicy::new(1, Some(Duration::ZERO));
        let path = tmp.path().join("session_a.logtmp");
        assert!(!policy.evaluate(&path).unwrap());

        File::create(&path).unwrap();
        assert!(!policy.evaluate(&path).unwrap());

        fs::write(&path, b"x").unwrap();
        assert!(policy.evaluate(&path).unwrap());
    }

    #[test]
    fn test_sealed_target_avoids_existing_segment() {
        let tmp = TempDir::new().unwrap();
        let first = sealed_target(tmp.path(), "abc");
        assert_eq!(first, tmp.path().join("session_abc.log"));

        fs::write(&first, b"sealed").unwrap();
        let second = sealed_target(tmp.path(), "abc");
        assert_ne!(second, first);
        let name = second.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("session_abc.") && name.ends_with(".log"));
    }

    #[test]
    fn test_seal_segment_renames() {
        let tmp = TempDir::new().unwrap();
        let open = tmp.path().join("session_abc.logtmp");
        fs::write(&open, b"frames").unwrap();
        let target = tmp.path().join("session_abc.log");

        seal_segment(&open, &target).unwrap();
        assert!(!open.exists());
        assert_eq!(fs::read(&target).unwrap(), b"frames");
    }
}
