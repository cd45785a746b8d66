//! Ack tracking
//!
//! Every command the client sends (except acks themselves) gets a slot
//! here before the bytes hit the socket. The matching `CommandAck` — or
//! the echoed `Hello` during the handshake — resolves the slot and wakes
//! the waiter. Slots that outlive the ack timeout are reaped by the
//! supervisor into the presumed-dead counter; reaping never signals the
//! waiter, which observes its own timeout.
//!
//! The ack only proves the peer received and parsed the command, not
//! that it acted on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug)]
struct AckSlot {
    created_at: Instant,
    signal: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
pub struct AckTracker {
    slots: Mutex<HashMap<Uuid, AckSlot>>,
    presumed_dead: AtomicU64,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot for `message_id`. Must happen before the command
    /// is written so the ack cannot race the registration.
    pub fn register(&self, message_id: Uuid) -> oneshot::Receiver<()> {
        let (signal, waiter) = oneshot::channel();
        self.slots.lock().unwrap().insert(
            message_id,
            AckSlot {
                created_at: Instant::now(),
                signal,
            },
        );
        waiter
    }

    /// Resolve the slot for `message_id`, waking its waiter. Returns
    /// false when no slot was open (duplicate or reaped ack).
    pub fn resolve(&self, message_id: &Uuid) -> bool {
        match self.slots.lock().unwrap().remove(message_id) {
            Some(slot) => {
                let _ = slot.signal.send(());
                true
            }
            None => false,
        }
    }

    /// Drop the slot without signaling; used by a waiter that gave up.
    pub fn abandon(&self, message_id: &Uuid) {
        self.slots.lock().unwrap().remove(message_id);
    }

    /// Remove slots older than `max_age`, counting each into the
    /// presumed-dead tally.
    pub fn reap_stale(&self, max_age: Duration) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let before = slots.len();
        slots.retain(|_, slot| slot.created_at.elapsed() <= max_age);
        let reaped = before - slots.len();
        if reaped > 0 {
            self.presumed_dead
                .fetch_add(reaped as u64, Ordering::Relaxed);
        }
        reaped
    }

    /// Abandon every outstanding slot (disconnect path).
    pub fn drain(&self) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let drained = slots.len();
        slots.clear();
        if drained > 0 {
            self.presumed_dead
                .fetch_add(drained as u64, Ordering::Relaxed);
        }
        drained
    }

    /// Commands whose ack never arrived before the slot was reaped or
    /// the link went down.
    pub fn presumed_dead_commands(&self) -> u64 {
        self.presumed_dead.load(Ordering::Relaxed)
    }

    pub fn outstanding(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}
