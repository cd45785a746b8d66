//! Query correlation
//!
//! A `query` call registers a slot keyed by the query's message id; the
//! reader resolves it when a reply with the matching `in_reply_to`
//! arrives. The hand-off is two-phase:
//! 1. the reader stores the reply and signals `reply_received`,
//! 2. the waiter takes the reply and signals `reply_processed`, at which
//!    point the reader's dispatch continues.
//!
//! The waiter signals `reply_processed` on its timeout path too, so the
//! reader can never be left hanging on a waiter that already gave up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nexq_wire::Message;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct QuerySlot {
    pub reply: Mutex<Option<Message>>,
    pub reply_received: Notify,
    pub reply_processed: Notify,
}

#[derive(Debug, Default)]
pub struct QueryTable {
    slots: Mutex<HashMap<Uuid, Arc<QuerySlot>>>,
}

impl QueryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, query_id: Uuid) -> Arc<QuerySlot> {
        let slot = Arc::new(QuerySlot::default());
        self.slots.lock().unwrap().insert(query_id, slot.clone());
        slot
    }

    /// The reader's view: an open slot for the correlation id, if the
    /// waiter is still there.
    pub fn lookup(&self, query_id: &Uuid) -> Option<Arc<QuerySlot>> {
        self.slots.lock().unwrap().get(query_id).cloned()
    }

    pub fn remove(&self, query_id: &Uuid) -> Option<Arc<QuerySlot>> {
        self.slots.lock().unwrap().remove(query_id)
    }

    /// Wake every open waiter with no reply (link-down / disconnect
    /// path). Waiters observe `None` and return.
    pub fn drain(&self) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.values() {
            slot.reply_received.notify_one();
        }
        slots.clear();
    }

    pub fn open_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}
