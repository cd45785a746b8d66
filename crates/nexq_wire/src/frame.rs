//! Framing
//!
//! Each command travels as one frame:
//!
//! ```text
//! offset 0..3   : u32 LE  payload length L
//! offset 4..7   : u32 LE  CRC32 (IEEE) of the payload bytes
//! offset 8..8+L : payload (see `command`)
//! ```
//!
//! `FrameDecoder` is a pull parser over a rolling receive buffer: the
//! session's read loop appends raw socket bytes and drains complete
//! commands one at a time. A declared length above the cap is rejected
//! before any allocation happens, and a checksum mismatch is fatal — the
//! stream can no longer be trusted to be frame-aligned.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::Command;
use crate::WireError;

/// Frame header size: length + CRC32.
pub const HEADER_LEN: usize = 8;

/// Default cap on a single frame's payload.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Encode `command` into a ready-to-write frame.
pub fn encode_frame(command: &Command) -> Result<Bytes, WireError> {
    let payload = command.encode_payload()?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_u32_le(crc32fast::hash(&payload));
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame_bytes,
        }
    }

    /// The rolling receive buffer. Read loops append socket bytes here
    /// (e.g. via `AsyncReadExt::read_buf`) and then drain with
    /// [`try_next`](Self::try_next).
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Append raw bytes to the receive buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next complete command, if the buffer holds one.
    /// `Ok(None)` means more bytes are needed; any `Err` is fatal for the
    /// session.
    pub fn try_next(&mut self) -> Result<Option<Command>, WireError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let declared = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        let declared = declared as usize;
        if declared > self.max_frame_bytes {
            return Err(WireError::FrameTooLarge {
                got: declared,
                cap: self.max_frame_bytes,
            });
        }
        if self.buf.len() < HEADER_LEN + declared {
            return Ok(None);
        }

        let mut header = self.buf.split_to(HEADER_LEN);
        header.advance(4);
        let expected_crc = header.get_u32_le();
        let payload = self.buf.split_to(declared).freeze();
        if crc32fast::hash(&payload) != expected_crc {
            return Err(WireError::CrcMismatch);
        }
        Command::decode_payload(payload).map(Some)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}
