//! Length-prefixed frame codec
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────┐
//! │ Length (u32, BE)     │ Payload (CBOR map, N bytes)  │
//! │ 4 bytes              │                              │
//! └──────────────────────┴──────────────────────────────┘
//! ```
//!
//! Payload keys: `version`, `time`, `session_id`, `user_id`, `role`,
//! `seq` (omitted when absent), `content`, `metadata`.

use super::Frame;
use crate::error::{Error, FrameDecodeError, Result};
use std::io::{ErrorKind, Read};

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest payload accepted on read or write (64 MiB)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Encode a frame as `[u32 BE length][CBOR payload]`
pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(160 + frame.content.len());
    ciborium::ser::into_writer(frame, &mut payload)
        .map_err(|e| Error::FrameEncode(e.to_string()))?;

    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::FrameEncode(format!(
            "frame payload of {} bytes exceeds limit of {} bytes",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }

    let mut out = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a CBOR payload (without its length prefix).
///
/// The payload must hold exactly one CBOR map. `offset` is only used to
/// label the error.
pub fn decode_payload(payload: &[u8], offset: u64) -> std::result::Result<Frame, FrameDecodeError> {
    let mut rest = payload;
    let frame = ciborium::de::from_reader(&mut rest).map_err(|e| FrameDecodeError::Corrupt {
        offset,
        reason: e.to_string(),
    })?;
    if !rest.is_empty() {
        return Err(FrameDecodeError::Corrupt {
            offset,
            reason: format!("{} trailing bytes after frame map", rest.len()),
        });
    }
    Ok(frame)
}

/// Decode the next frame from `reader`, which is positioned at `offset`.
///
/// Returns `Ok(None)` at a clean end of stream, otherwise the frame and the
/// number of bytes consumed (`4 + length`).
pub fn decode_from<R: Read>(
    reader: &mut R,
    offset: u64,
) -> std::result::Result<Option<(Frame, usize)>, FrameDecodeError> {
    let mut header = [0u8; LENGTH_PREFIX_LEN];
    let got = read_up_to(reader, &mut header).map_err(|e| FrameDecodeError::Io {
        offset,
        reason: e.to_string(),
    })?;

    if got == 0 {
        return Ok(None);
    }
    if got < LENGTH_PREFIX_LEN {
        return Err(FrameDecodeError::TruncatedHeader { offset });
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::Corrupt {
            offset,
            reason: format!("declared length {} exceeds limit of {}", len, MAX_FRAME_LEN),
        });
    }

    let mut payload = Vec::with_capacity(len);
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut payload)
        .map_err(|e| FrameDecodeError::Io {
            offset,
            reason: e.to_string(),
        })?;

    if payload.len() < len {
        return Err(FrameDecodeError::TruncatedPayload {
            offset,
            expected: len,
            available: payload.len(),
        });
    }

    let frame = decode_payload(&payload, offset)?;
    Ok(Some((frame, LENGTH_PREFIX_LEN + len)))
}

/// Fill `buf` as far as the reader allows; returns the byte count read
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
