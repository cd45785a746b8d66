//! nexq_broker
//!
//! The broker crate contains the central in-memory engine responsible for
//! managing queues, subscriptions and message delivery: FIFO fan-out with
//! per-subscriber pacing, query/reply correlation, expiry, and cleanup
//! when peers go away.
//!
//! Public types:
//! - `Broker`: core engine to register peers, enqueue messages, manage
//!   queues and track deliveries.
//! - `Peer`: a connected peer's handle (id + outbound command channel).
//!
//! This crate is intended to be used by a transport crate (the TCP
//! server) or binary crates that wire together network and configuration.
//! The engine is synchronous and designed to be held behind
//! `Arc<Mutex<Broker>>`; callers must not hold the lock across network
//! I/O. Outbound sends go through unbounded channels and never block.

pub mod engine;
pub mod peer;
pub mod queue;

pub use engine::Broker;
pub use peer::Peer;

#[cfg(test)]
mod tests;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("queue name must not be empty")]
    EmptyQueueName,
    #[error("peer {0} is not registered")]
    UnknownPeer(uuid::Uuid),
}
