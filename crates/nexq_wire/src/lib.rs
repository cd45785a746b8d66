//! nexq_wire
//!
//! The wire protocol spoken between nexq peers: the message record, the
//! tagged command envelope, and the length-delimited CRC32-checked frame
//! codec that carries commands over a byte stream.
//!
//! Public types:
//! - `Message`: the routed record (notification, query or reply).
//! - `Command` / `CommandKind`: the envelope a frame carries.
//! - `FrameDecoder` / `encode_frame`: stream reassembly and framing.
//!
//! This crate is transport-agnostic: it never touches a socket. Both the
//! broker and the client build on it.

pub mod command;
pub mod frame;
pub mod message;

pub use command::{Command, CommandKind};
pub use frame::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_BYTES, HEADER_LEN};
pub use message::Message;

#[cfg(test)]
mod tests;

/// Errors produced while encoding or decoding the wire protocol. All of
/// them are fatal for the session that produced the bytes: once a frame
/// fails to parse the stream is desynchronized.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame too large: {got} bytes (cap {cap})")]
    FrameTooLarge { got: usize, cap: usize },
    #[error("payload checksum mismatch")]
    CrcMismatch,
    #[error("unknown command kind {0}")]
    UnknownCommand(u8),
    #[error("malformed payload: {0}")]
    Malformed(&'static str),
}
