//! Command envelope
//!
//! Every frame carries exactly one `Command`: a kind tag plus a `Message`.
//! Control kinds use only the identifying fields of the message; `Enqueue`
//! and `ProcessMessage` carry the full record.
//!
//! Payload layout (little-endian throughout):
//!
//! ```text
//! kind        u8
//! message_id  16 bytes
//! peer_id     16 bytes
//! queue       u16 length + UTF-8
//! label       u32 length + UTF-8
//! body        u32 length + UTF-8
//! expire_secs u32
//! enqueued_at i64 (unix millis)
//! is_query    u8
//! is_reply    u8
//! in_reply_to 16 bytes (all-zero when absent)
//! ```
//!
//! The vocabulary is append-only: new kinds may be assigned higher tags,
//! and a receiver that sees a tag it does not know must drop the session.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::message::Message;
use crate::WireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    Hello = 1,
    Enqueue = 2,
    Subscribe = 3,
    Unsubscribe = 4,
    Clear = 5,
    ProcessMessage = 6,
    CommandAck = 7,
}

impl CommandKind {
    pub fn from_u8(tag: u8) -> Result<Self, WireError> {
        match tag {
            1 => Ok(Self::Hello),
            2 => Ok(Self::Enqueue),
            3 => Ok(Self::Subscribe),
            4 => Ok(Self::Unsubscribe),
            5 => Ok(Self::Clear),
            6 => Ok(Self::ProcessMessage),
            7 => Ok(Self::CommandAck),
            other => Err(WireError::UnknownCommand(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub message: Message,
}

impl Command {
    pub fn hello(peer_id: Uuid) -> Self {
        Self {
            kind: CommandKind::Hello,
            message: Message::control(peer_id, ""),
        }
    }

    pub fn enqueue(message: Message) -> Self {
        Self {
            kind: CommandKind::Enqueue,
            message,
        }
    }

    pub fn subscribe(peer_id: Uuid, queue: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Subscribe,
            message: Message::control(peer_id, queue),
        }
    }

    pub fn unsubscribe(peer_id: Uuid, queue: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Unsubscribe,
            message: Message::control(peer_id, queue),
        }
    }

    pub fn clear(peer_id: Uuid, queue: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Clear,
            message: Message::control(peer_id, queue),
        }
    }

    pub fn process(message: Message) -> Self {
        Self {
            kind: CommandKind::ProcessMessage,
            message,
        }
    }

    /// Acknowledge the command carrying `acked_id`. The ack reuses the
    /// acked command's message id so the sender can match its wait slot.
    pub fn ack(peer_id: Uuid, acked_id: Uuid) -> Self {
        let mut message = Message::control(peer_id, "");
        message.message_id = acked_id;
        Self {
            kind: CommandKind::CommandAck,
            message,
        }
    }

    /// Serialize the command into its payload bytes. Deterministic: the
    /// same command always yields the same bytes.
    pub fn encode_payload(&self) -> Result<Bytes, WireError> {
        let m = &self.message;
        if m.queue.len() > usize::from(u16::MAX) {
            return Err(WireError::Malformed("queue name exceeds u16 length"));
        }
        if m.label.len() > u32::MAX as usize || m.body.len() > u32::MAX as usize {
            return Err(WireError::Malformed("label or body exceeds u32 length"));
        }

        let mut buf = BytesMut::with_capacity(64 + m.queue.len() + m.label.len() + m.body.len());
        buf.put_u8(self.kind as u8);
        buf.put_slice(m.message_id.as_bytes());
        buf.put_slice(m.peer_id.as_bytes());
        buf.put_u16_le(m.queue.len() as u16);
        buf.put_slice(m.queue.as_bytes());
        buf.put_u32_le(m.label.len() as u32);
        buf.put_slice(m.label.as_bytes());
        buf.put_u32_le(m.body.len() as u32);
        buf.put_slice(m.body.as_bytes());
        buf.put_u32_le(m.expire_secs);
        buf.put_i64_le(m.enqueued_at);
        buf.put_u8(u8::from(m.is_query));
        buf.put_u8(u8::from(m.is_reply));
        buf.put_slice(m.in_reply_to.unwrap_or(Uuid::nil()).as_bytes());
        Ok(buf.freeze())
    }

    /// Reconstruct a command from payload bytes. Rejects unknown kinds,
    /// truncated payloads, invalid UTF-8 and trailing garbage.
    pub fn decode_payload(mut buf: Bytes) -> Result<Self, WireError> {
        if buf.remaining() < 1 {
            return Err(WireError::Malformed("empty payload"));
        }
        let kind = CommandKind::from_u8(buf.get_u8())?;
        let message_id = read_uuid(&mut buf)?;
        let peer_id = read_uuid(&mut buf)?;
        let queue = read_string(&mut buf, ReadLen::U16)?;
        let label = read_string(&mut buf, ReadLen::U32)?;
        let body = read_string(&mut buf, ReadLen::U32)?;
        if buf.remaining() < 4 + 8 + 1 + 1 + 16 {
            return Err(WireError::Malformed("truncated payload"));
        }
        let expire_secs = buf.get_u32_le();
        let enqueued_at = buf.get_i64_le();
        let is_query = buf.get_u8() != 0;
        let is_reply = buf.get_u8() != 0;
        let in_reply_to = read_uuid(&mut buf)?;
        let in_reply_to = if in_reply_to.is_nil() {
            None
        } else {
            Some(in_reply_to)
        };
        if buf.has_remaining() {
            return Err(WireError::Malformed("trailing bytes after payload"));
        }
        if is_query && is_reply {
            return Err(WireError::Malformed("message is both query and reply"));
        }
        if is_reply && in_reply_to.is_none() {
            return Err(WireError::Malformed("reply without in_reply_to"));
        }
        Ok(Self {
            kind,
            message: Message {
                message_id,
                peer_id,
                queue,
                label,
                body,
                expire_secs,
                enqueued_at,
                is_query,
                is_reply,
                in_reply_to,
            },
        })
    }
}

enum ReadLen {
    U16,
    U32,
}

fn read_uuid(buf: &mut Bytes) -> Result<Uuid, WireError> {
    if buf.remaining() < 16 {
        return Err(WireError::Malformed("truncated uuid"));
    }
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes(raw))
}

fn read_string(buf: &mut Bytes, len: ReadLen) -> Result<String, WireError> {
    let wanted = match len {
        ReadLen::U16 => {
            if buf.remaining() < 2 {
                return Err(WireError::Malformed("truncated string length"));
            }
            usize::from(buf.get_u16_le())
        }
        ReadLen::U32 => {
            if buf.remaining() < 4 {
                return Err(WireError::Malformed("truncated string length"));
            }
            buf.get_u32_le() as usize
        }
    };
    if buf.remaining() < wanted {
        return Err(WireError::Malformed("truncated string"));
    }
    let raw = buf.split_to(wanted);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::Malformed("invalid utf-8"))
}
