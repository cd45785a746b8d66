//! Broker engine
//!
//! The in-memory engine responsible for:
//! - managing queues and subscriber sets (names are case-insensitive)
//! - fanning notifications out to subscribers, one unacked message per
//!   (queue, subscriber) at a time, FIFO per subscriber
//! - correlating queries with their replies and routing each reply only
//!   to the peer that asked
//! - expiring stale items and abandoning deliveries to unresponsive peers
//!
//! Usage notes:
//! - The public API is synchronous and designed to be held behind
//!   `Arc<Mutex<Broker>>` by the transport layer. Outbound delivery goes
//!   through each peer's unbounded channel, so no engine call blocks on
//!   the network.
//! - `start_sweep_loop` runs the periodic maintenance pass as a
//!   background task: expiry, delivery reaping and re-pumping.

use std::collections::HashMap;

use chrono::Utc;
use nexq_wire::{Command, Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::peer::Peer;
use crate::queue::{DeliveryState, Inflight, Queue};
use crate::BrokerError;

/// A query waiting for its reply, keyed by the query's message id.
#[derive(Debug)]
pub struct PendingQuery {
    pub origin: Uuid,
    pub queue_key: String,
    pub enqueued_at: i64,
    pub expire_secs: u32,
}

impl PendingQuery {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expire_secs > 0 && now_ms > self.enqueued_at + i64::from(self.expire_secs) * 1000
    }
}

#[derive(Debug)]
pub struct Broker {
    /// Queues keyed by lowercased name; `Queue::name` keeps the
    /// first-seen spelling.
    pub queues: HashMap<String, Queue>,
    pub peers: HashMap<Uuid, Peer>,
    pub inflight_queries: HashMap<Uuid, PendingQuery>,
    /// Deliveries abandoned because the subscriber never acknowledged.
    pub presumed_dead: u64,
    ack_timeout_ms: i64,
}

impl Broker {
    /// Timeout in milliseconds after which an un-acked delivery is
    /// abandoned and the subscriber presumed dead for that item.
    pub const DEFAULT_ACK_TIMEOUT_MS: i64 = 15_000;

    pub fn new() -> Self {
        Self::with_ack_timeout(Self::DEFAULT_ACK_TIMEOUT_MS)
    }

    pub fn with_ack_timeout(ack_timeout_ms: i64) -> Self {
        Self {
            queues: HashMap::new(),
            peers: HashMap::new(),
            inflight_queries: HashMap::new(),
            presumed_dead: 0,
            ack_timeout_ms,
        }
    }

    pub fn register_peer(&mut self, peer: Peer) {
        info!(peer = %peer.id, "peer registered");
        self.peers.insert(peer.id, peer);
    }

    /// Tear down everything tied to a departing peer: subscriptions,
    /// outstanding deliveries and queries it originated. Items it was the
    /// last outstanding target of complete normally.
    pub fn cleanup_peer(&mut self, peer_id: &Uuid) {
        if self.peers.remove(peer_id).is_none() {
            return;
        }
        self.inflight_queries.retain(|_, pq| pq.origin != *peer_id);
        let keys: Vec<String> = self.queues.keys().cloned().collect();
        for key in &keys {
            if let Some(queue) = self.queues.get_mut(key) {
                queue.unsubscribe(peer_id);
            }
            self.pump_queue(key);
        }
        info!(peer = %peer_id, "peer cleaned up");
    }

    /// Session-scoped cleanup: runs only while `sender` is still the
    /// registered channel for the peer. A client that reconnected with
    /// the same peer id has already replaced the registration, and the
    /// old session's teardown must not tear the new one down.
    pub fn cleanup_session(
        &mut self,
        peer_id: &Uuid,
        sender: &tokio::sync::mpsc::UnboundedSender<Command>,
    ) {
        match self.peers.get(peer_id) {
            Some(peer) if peer.sender.same_channel(sender) => self.cleanup_peer(peer_id),
            Some(_) => debug!(peer = %peer_id, "stale session ended, peer already re-registered"),
            None => {}
        }
    }

    pub fn subscribe(&mut self, queue_name: &str, peer_id: Uuid) -> Result<(), BrokerError> {
        if queue_name.is_empty() {
            return Err(BrokerError::EmptyQueueName);
        }
        if !self.peers.contains_key(&peer_id) {
            return Err(BrokerError::UnknownPeer(peer_id));
        }
        let key = queue_key(queue_name);
        let now = now_ms();
        self.queues
            .entry(key.clone())
            .or_insert_with(|| Queue::new(queue_name, now))
            .subscribe(peer_id);
        info!(peer = %peer_id, queue = queue_name, "subscribed");
        self.pump_queue(&key);
        Ok(())
    }

    pub fn unsubscribe(&mut self, queue_name: &str, peer_id: &Uuid) {
        if let Some(queue) = self.queues.get_mut(&queue_key(queue_name)) {
            queue.unsubscribe(peer_id);
            info!(peer = %peer_id, queue = queue_name, "unsubscribed");
        }
    }

    /// Empty a queue's item buffer. The subscriber set survives.
    pub fn clear(&mut self, queue_name: &str) {
        if let Some(queue) = self.queues.get_mut(&queue_key(queue_name)) {
            queue.clear();
            info!(queue = queue_name, "queue cleared");
        }
    }

    pub fn enqueue(&mut self, message: Message) -> Result<(), BrokerError> {
        self.enqueue_at(message, now_ms())
    }

    pub(crate) fn enqueue_at(&mut self, mut message: Message, now: i64) -> Result<(), BrokerError> {
        if message.queue.is_empty() {
            return Err(BrokerError::EmptyQueueName);
        }
        message.enqueued_at = now;

        if message.is_reply {
            self.route_reply(message);
            return Ok(());
        }

        let key = queue_key(&message.queue);
        if message.is_query {
            self.inflight_queries.insert(
                message.message_id,
                PendingQuery {
                    origin: message.peer_id,
                    queue_key: key.clone(),
                    enqueued_at: now,
                    expire_secs: message.expire_secs,
                },
            );
        }
        let name = message.queue.clone();
        self.queues
            .entry(key.clone())
            .or_insert_with(|| Queue::new(&name, now))
            .push(message);
        self.pump_queue(&key);
        Ok(())
    }

    /// A reply routes only to the peer that issued the matching query;
    /// it never enters the queue. Replies with no open query are dropped.
    fn route_reply(&mut self, reply: Message) {
        let Some(query_id) = reply.in_reply_to else {
            debug!("reply without correlation id dropped");
            return;
        };
        let Some(pending) = self.inflight_queries.remove(&query_id) else {
            debug!(query = %query_id, "reply for unknown query dropped");
            return;
        };
        if let Some(queue) = self.queues.get_mut(&pending.queue_key) {
            queue.remove_item(&query_id);
        }
        match self.peers.get(&pending.origin) {
            Some(peer) => {
                if !peer.send(Command::process(reply)) {
                    warn!(peer = %pending.origin, "failed to route reply to originator");
                }
            }
            None => debug!(peer = %pending.origin, "query originator gone, reply dropped"),
        }
        self.pump_queue(&pending.queue_key);
    }

    /// Handle a delivery acknowledgment from `peer_id` for `message_id`.
    /// Frees the (queue, subscriber) slot and lets the next item flow.
    pub fn handle_ack(&mut self, peer_id: &Uuid, message_id: &Uuid) {
        let matched = self
            .queues
            .iter()
            .find_map(|(key, queue)| match queue.inflight.get(peer_id) {
                Some(flight) if flight.message_id == *message_id => Some(key.clone()),
                _ => None,
            });
        let Some(key) = matched else {
            debug!(peer = %peer_id, message = %message_id, "ack for unknown delivery");
            return;
        };
        if let Some(queue) = self.queues.get_mut(&key) {
            queue.inflight.remove(peer_id);
            if let Some(item) = queue
                .items
                .iter_mut()
                .find(|item| item.message.message_id == *message_id)
            {
                if let Some(delivery) = &mut item.delivery {
                    delivery.acked.insert(*peer_id);
                }
            }
            queue.drop_completed();
        }
        self.pump_queue(&key);
    }

    /// Periodic maintenance: drop expired items and queries, abandon
    /// deliveries unacked past the timeout, then re-pump every queue.
    pub fn sweep(&mut self) {
        self.sweep_at(now_ms());
    }

    pub(crate) fn sweep_at(&mut self, now: i64) {
        let ack_timeout = self.ack_timeout_ms;
        for queue in self.queues.values_mut() {
            queue.drop_expired(now);

            let stale: Vec<(Uuid, Inflight)> = queue
                .inflight
                .iter()
                .filter(|(_, flight)| now - flight.sent_at > ack_timeout)
                .map(|(peer, flight)| (*peer, *flight))
                .collect();
            for (peer, flight) in stale {
                queue.inflight.remove(&peer);
                self.presumed_dead += 1;
                warn!(peer = %peer, message = %flight.message_id, "delivery unacked past timeout, abandoning");
                if let Some(item) = queue
                    .items
                    .iter_mut()
                    .find(|item| item.message.message_id == flight.message_id)
                {
                    if let Some(delivery) = &mut item.delivery {
                        delivery.targets.remove(&peer);
                    }
                }
            }
            queue.drop_completed();
        }

        self.inflight_queries.retain(|id, pending| {
            let keep = !pending.is_expired(now);
            if !keep {
                debug!(query = %id, "query expired without reply");
            }
            keep
        });

        let keys: Vec<String> = self.queues.keys().cloned().collect();
        for key in keys {
            self.pump_queue(&key);
        }
    }

    /// Attempt delivery for every subscriber of the queue that has no
    /// message outstanding. Walks the FIFO front-to-back, capturing the
    /// target set of an item the first time anyone selects it.
    fn pump_queue(&mut self, key: &str) {
        let now = now_ms();
        let Some(queue) = self.queues.get_mut(key) else {
            return;
        };
        queue.drop_expired(now);

        let subscribers: Vec<Uuid> = queue.subscribers.iter().copied().collect();
        for subscriber in subscribers {
            if queue.inflight.contains_key(&subscriber) {
                continue;
            }
            let mut next: Option<Message> = None;
            {
                let subscriber_set = &queue.subscribers;
                for item in queue.items.iter_mut() {
                    let delivery = item
                        .delivery
                        .get_or_insert_with(|| DeliveryState::capture(subscriber_set));
                    if delivery.targets.contains(&subscriber)
                        && !delivery.acked.contains(&subscriber)
                    {
                        next = Some(item.message.clone());
                        break;
                    }
                }
            }
            let Some(message) = next else {
                continue;
            };
            let delivered = self
                .peers
                .get(&subscriber)
                .map(|peer| peer.send(Command::process(message.clone())))
                .unwrap_or(false);
            if delivered {
                queue.inflight.insert(
                    subscriber,
                    Inflight {
                        message_id: message.message_id,
                        sent_at: now,
                    },
                );
            } else {
                warn!(peer = %subscriber, queue = %queue.name, "failed to deliver, session channel closed");
            }
        }
    }

    pub fn queue_depth(&self, queue_name: &str) -> usize {
        self.queues
            .get(&queue_key(queue_name))
            .map(Queue::depth)
            .unwrap_or(0)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.values().map(|q| q.name.clone()).collect()
    }

    /// Run the maintenance pass forever at `interval_ms`. Spawn this once
    /// next to the transport.
    pub async fn start_sweep_loop(
        broker: std::sync::Arc<std::sync::Mutex<Broker>>,
        interval_ms: u64,
    ) {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_millis(interval_ms)).await;
            broker.lock().unwrap().sweep();
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

fn queue_key(name: &str) -> String {
    name.to_lowercase()
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
