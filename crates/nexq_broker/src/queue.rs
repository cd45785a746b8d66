//! Queue state
//!
//! A `Queue` holds the FIFO item buffer, the subscriber set and the
//! per-subscriber delivery bookkeeping for one queue name. Duplicate
//! subscriptions are a no-op.
//!
//! Delivery bookkeeping:
//! - `DeliveryState` is attached to an item the first time the dispatcher
//!   selects it for anyone; the target set is frozen at that moment, so a
//!   subscriber arriving later never joins an in-flight item.
//! - `inflight` maps a subscriber to the single item it currently holds
//!   unacked. The dispatcher never sends a second item to a subscriber
//!   with an entry here.
//!
//! Concurrency note: callers must synchronize access via the broker lock.

use std::collections::{HashMap, HashSet, VecDeque};

use nexq_wire::Message;
use uuid::Uuid;

#[derive(Debug)]
pub struct DeliveryState {
    /// Subscribers present when the item was first dispatched.
    pub targets: HashSet<Uuid>,
    /// Targets that have acknowledged their copy.
    pub acked: HashSet<Uuid>,
}

impl DeliveryState {
    pub fn capture(subscribers: &HashSet<Uuid>) -> Self {
        Self {
            targets: subscribers.clone(),
            acked: HashSet::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.targets.is_subset(&self.acked)
    }
}

#[derive(Debug)]
pub struct QueueItem {
    pub message: Message,
    pub delivery: Option<DeliveryState>,
}

#[derive(Debug, Clone, Copy)]
pub struct Inflight {
    pub message_id: Uuid,
    pub sent_at: i64,
}

#[derive(Debug)]
pub struct Queue {
    pub name: String,
    pub items: VecDeque<QueueItem>,
    pub subscribers: HashSet<Uuid>,
    pub inflight: HashMap<Uuid, Inflight>,
    pub created_at: i64,
}

impl Queue {
    pub fn new(name: &str, now_ms: i64) -> Self {
        Self {
            name: name.to_string(),
            items: VecDeque::new(),
            subscribers: HashSet::new(),
            inflight: HashMap::new(),
            created_at: now_ms,
        }
    }

    /// Add a subscriber. Duplicate adds are ignored.
    pub fn subscribe(&mut self, id: Uuid) {
        self.subscribers.insert(id);
    }

    /// Remove a subscriber along with its delivery bookkeeping. Items it
    /// was the last outstanding target of complete and drop out.
    pub fn unsubscribe(&mut self, id: &Uuid) {
        self.subscribers.remove(id);
        self.inflight.remove(id);
        for item in &mut self.items {
            if let Some(delivery) = &mut item.delivery {
                delivery.targets.remove(id);
                delivery.acked.remove(id);
            }
        }
        self.drop_completed();
    }

    pub fn push(&mut self, message: Message) {
        self.items.push_back(QueueItem {
            message,
            delivery: None,
        });
    }

    /// Empty the item buffer, preserving the subscriber set.
    pub fn clear(&mut self) {
        self.items.clear();
        self.inflight.clear();
    }

    /// Remove one item by id regardless of delivery progress, purging any
    /// inflight entries that referenced it.
    pub fn remove_item(&mut self, message_id: &Uuid) -> Option<Message> {
        let pos = self
            .items
            .iter()
            .position(|item| item.message.message_id == *message_id)?;
        let item = self.items.remove(pos)?;
        self.inflight.retain(|_, f| f.message_id != *message_id);
        Some(item.message)
    }

    /// Drop items past their expiry. Expired items are never delivered,
    /// even when copies are already outstanding.
    pub fn drop_expired(&mut self, now_ms: i64) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.message.is_expired(now_ms));
        let dropped = before - self.items.len();
        if dropped > 0 {
            let items = &self.items;
            self.inflight
                .retain(|_, f| items.iter().any(|i| i.message.message_id == f.message_id));
        }
        dropped
    }

    /// Drop items whose captured target set has fully acknowledged (or
    /// drained away).
    pub fn drop_completed(&mut self) {
        self.items.retain(|item| match &item.delivery {
            Some(delivery) => !delivery.is_complete(),
            None => true,
        });
    }

    pub fn depth(&self) -> usize {
        self.items.len()
    }
}
