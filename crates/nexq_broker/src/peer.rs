//! Peer handle
//!
//! `Peer` models a connected peer inside the engine and holds the sending
//! side of the per-session channel the transport drains onto the socket.
//! The peer id is minted by the client and presented in its `Hello`.

use nexq_wire::Command;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

#[derive(Debug)]
pub struct Peer {
    pub id: Uuid,
    pub sender: UnboundedSender<Command>,
}

impl Peer {
    pub fn new(id: Uuid, sender: UnboundedSender<Command>) -> Self {
        Self { id, sender }
    }

    /// Queue a command for the peer's writer task. Returns false when the
    /// session's channel is already closed.
    pub fn send(&self, command: Command) -> bool {
        self.sender.send(command).is_ok()
    }
}
