//! Output sinks for frames read back from segments

use crate::error::{Error, Result};
use crate::frame::{encode, Frame};
use std::io::Write;
use std::str::FromStr;

/// Output encoding for `read`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Length-prefixed CBOR, identical to the segment encoding
    Binary,
    /// One JSON object per line
    #[default]
    Jsonl,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "binary" | "cbor" => Ok(OutputFormat::Binary),
            "jsonl" | "json" => Ok(OutputFormat::Jsonl),
            _ => Err(Error::Config(format!("Unknown output format: {}", s))),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Binary => write!(f, "binary"),
            OutputFormat::Jsonl => write!(f, "jsonl"),
        }
    }
}

/// Writes frames to an output stream in the chosen format
pub struct FrameSink<W: Write> {
    out: W,
    format: OutputFormat,
    written: u64,
}

impl<W: Write> FrameSink<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            written: 0,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        match self.format {
            OutputFormat::Binary => {
                let bytes = encode(frame)?;
                self.out.write_all(&bytes)?;
            }
            OutputFormat::Jsonl => {
                serde_json::to_writer(&mut self.out, frame)?;
                self.out.write_all(b"\n")?;
            }
        }
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Number of frames written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Role;
    use crate::reader::{FrameReader, ReadMode};
    use std::io::Cursor;

    #[test]
    fn test_jsonl_writes_one_object_per_line() {
        let mut sink = FrameSink::new(Vec::new(), OutputFormat::Jsonl);
        sink.write_frame(&Frame::new("abc", "u1", Role::User, "line one").with_seq(0))
            .unwrap();
        sink.write_frame(&Frame::new("abc", "u1", Role::Assistant, "line\ntwo"))
            .unwrap();
        assert_eq!(sink.written(), 2);

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["session_id"], "abc");
        assert_eq!(first["role"], "user");
        assert_eq!(first["seq"], 0);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["content"], "line\ntwo");
        assert!(second.get("seq").is_none());
    }

    #[test]
    fn test_binary_output_is_readable_as_a_segment() {
        let frames = vec![
            Frame::new("abc", "u1", Role::User, "hi").with_seq(1),
            Frame::new("abc", "u1", Role::Assistant, "hello").with_seq(2),
        ];
        let mut sink = FrameSink::new(Vec::new(), OutputFormat::Binary);
        for f in &frames {
            sink.write_frame(f).unwrap();
        }

        let bytes = sink.into_inner();
        let decoded: Vec<Frame> = FrameReader::new(Cursor::new(bytes), ReadMode::Strict)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSONL".parse::<OutputFormat>().unwrap(), OutputFormat::Jsonl);
        assert_eq!("binary".parse::<OutputFormat>().unwrap(), OutputFormat::Binary);
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
