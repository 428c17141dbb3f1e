//! Read command implementation

use crate::error::Result;
use crate::reader::{scan_segments, FrameSink, OutputFormat, ReadOptions, ReadReport};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ReadCommandOptions {
    pub paths: Vec<PathBuf>,
    pub read: ReadOptions,
    pub format: OutputFormat,
}

/// Stream frames from every path to `out`
pub fn cmd_read<W: Write>(options: &ReadCommandOptions, out: W) -> Result<ReadReport> {
    let mut sink = FrameSink::new(out, options.format);
    let report = scan_segments(&options.paths, &options.read, &mut sink)?;
    info!(
        files = options.paths.len(),
        frames = report.stats.total,
        gaps = report.gaps.len(),
        errors = report.errors.len(),
        "Read complete"
    );
    Ok(report)
}

/// Diagnostics go to stderr; stdout carries the frames
pub fn print_read_report(report: &ReadReport, show_stats: bool) {
    for gap in &report.gaps {
        eprintln!(
            "[warn] sequence gap in {}: {} -> {}",
            gap.file, gap.last_seq, gap.seq
        );
    }
    for failure in &report.errors {
        eprintln!("[error] {}: {}", failure.path.display(), failure.error);
    }
    if show_stats {
        eprintln!("frames: {}", report.stats.total);
        for (session, count) in &report.stats.per_session {
            eprintln!("  {}: {}", session, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode, Frame, Role};
    use crate::reader::{FrameFilter, ReadMode};
    use tempfile::TempDir;

    #[test]
    fn test_cmd_read_filters_by_role_into_jsonl() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session_s.log");
        let mut bytes = Vec::new();
        for (i, role) in [Role::User, Role::Assistant, Role::User].into_iter().enumerate() {
            let frame = Frame::new("s", "u1", role, format!("m{i}")).with_seq(i as i64);
            bytes.extend(encode(&frame).unwrap());
        }
        std::fs::write(&path, bytes).unwrap();

        let options = ReadCommandOptions {
            paths: vec![path],
            read: ReadOptions {
                mode: ReadMode::Lenient,
                filter: FrameFilter {
                    role: Some(Role::User),
                    ..Default::default()
                },
            },
            format: OutputFormat::Jsonl,
        };
        let mut out = Vec::new();
        let report = cmd_read(&options, &mut out).unwrap();

        assert_eq!(report.stats.total, 2);
        assert!(report.gaps.is_empty());
        let text = String::from_utf8(out).unwrap();
        let contents: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["content"].to_string())
            .collect();
        assert_eq!(contents, vec!["\"m0\"", "\"m2\""]);
    }
}
