//! nexq_client
//!
//! The connecting side of the broker protocol: dial the server, speak
//! the `Hello` handshake, publish notifications, subscribe to queues and
//! issue queries that resolve to correlated replies.
//!
//! The client owns three background pieces:
//! - a reader task per connection that decodes inbound frames and fires
//!   the registered event handlers,
//! - an ack tracker matching every sent command against its
//!   `CommandAck`,
//! - a supervisor task that reaps stale ack slots, re-dials a lost
//!   connection and replays subscriptions.
//!
//! All operations fail fast with [`ClientError::NotConnected`] while the
//! link is down; the supervisor keeps trying to bring it back for as
//! long as the client lives.

pub mod ack;
pub mod client;
pub mod events;
pub mod query;

pub use client::{Client, ClientOptions};
pub use events::EventHandlers;
pub use nexq_wire::Message;


#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("handshake was not acknowledged")]
    HandshakeFailed,
    #[error("queue name must not be empty")]
    EmptyQueueName,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
