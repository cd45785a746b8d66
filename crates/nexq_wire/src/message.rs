//! Message record
//!
//! `Message` is the canonical unit routed by the broker. The same record
//! shape backs all three delivery flavors:
//! - notification: neither `is_query` nor `is_reply`, fanned out to every
//!   subscriber of the queue
//! - query: `is_query`, fanned out like a notification but correlated so
//!   the reply can find its way back
//! - reply: `is_reply` with `in_reply_to` set, routed only to the peer
//!   that issued the original query
//!
//! `expire_secs == 0` means the message never expires. `enqueued_at` is
//! milliseconds since the UNIX epoch and is stamped by the broker when the
//! message enters a queue.

use chrono::Utc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: Uuid,
    pub peer_id: Uuid,
    pub queue: String,
    pub label: String,
    pub body: String,
    pub expire_secs: u32,
    pub enqueued_at: i64,
    pub is_query: bool,
    pub is_reply: bool,
    pub in_reply_to: Option<Uuid>,
}

impl Message {
    /// Build a notification for `queue`.
    pub fn notification(
        peer_id: Uuid,
        queue: impl Into<String>,
        label: impl Into<String>,
        body: impl Into<String>,
        expire_secs: u32,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            peer_id,
            queue: queue.into(),
            label: label.into(),
            body: body.into(),
            expire_secs,
            enqueued_at: Utc::now().timestamp_millis(),
            is_query: false,
            is_reply: false,
            in_reply_to: None,
        }
    }

    /// Build a query. The minted `message_id` is the correlation key the
    /// matching reply must carry in `in_reply_to`.
    pub fn query(
        peer_id: Uuid,
        queue: impl Into<String>,
        label: impl Into<String>,
        body: impl Into<String>,
        expire_secs: u32,
    ) -> Self {
        Self {
            is_query: true,
            ..Self::notification(peer_id, queue, label, body, expire_secs)
        }
    }

    /// Build the reply to `query`. The reply inherits the query's queue
    /// and points back at it via `in_reply_to`. The caller owns filling in
    /// `peer_id` before the reply goes on the wire.
    pub fn reply_to(
        query: &Message,
        label: impl Into<String>,
        body: impl Into<String>,
        expire_secs: u32,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            peer_id: Uuid::nil(),
            queue: query.queue.clone(),
            label: label.into(),
            body: body.into(),
            expire_secs,
            enqueued_at: Utc::now().timestamp_millis(),
            is_query: false,
            is_reply: true,
            in_reply_to: Some(query.message_id),
        }
    }

    /// Build a control-command record: only the identifying fields carry
    /// meaning (`Hello`, `Subscribe`, `Unsubscribe`, `Clear`, `CommandAck`).
    pub fn control(peer_id: Uuid, queue: impl Into<String>) -> Self {
        Self::notification(peer_id, queue, "", "", 0)
    }

    /// Whether the message has outlived its `expire_secs` at `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expire_secs > 0 && now_ms > self.enqueued_at + i64::from(self.expire_secs) * 1000
    }
}
