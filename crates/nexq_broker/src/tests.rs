use super::engine::Broker;
use super::peer::Peer;
use super::BrokerError;
use chrono::Utc;
use nexq_wire::{Command, CommandKind, Message};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn register_peer(broker: &mut Broker) -> (Uuid, UnboundedReceiver<Command>) {
    let (tx, rx) = mpsc::unbounded_channel::<Command>();
    let id = Uuid::new_v4();
    broker.register_peer(Peer::new(id, tx));
    (id, rx)
}

fn recv_process(rx: &mut UnboundedReceiver<Command>) -> Message {
    let command = rx.try_recv().expect("expected a delivery");
    assert_eq!(command.kind, CommandKind::ProcessMessage);
    command.message
}

#[test]
fn test_queue_new() {
    let queue = super::queue::Queue::new("jobs", 0);
    assert_eq!(queue.name, "jobs");
    assert!(queue.subscribers.is_empty());
    assert_eq!(queue.depth(), 0);
}

#[test]
fn test_subscribe_is_idempotent() {
    let mut broker = Broker::new();
    let (a, _rx) = register_peer(&mut broker);

    for _ in 0..3 {
        broker.subscribe("jobs", a).unwrap();
    }
    broker.unsubscribe("jobs", &a);

    let queue = broker.queues.get("jobs").unwrap();
    assert!(!queue.subscribers.contains(&a));
}

#[test]
fn test_queue_names_are_case_insensitive() {
    let mut broker = Broker::new();
    let (a, mut rx) = register_peer(&mut broker);

    broker.subscribe("Jobs", a).unwrap();
    let msg = Message::notification(Uuid::new_v4(), "JOBS", "", "case test", 0);
    broker.enqueue(msg).unwrap();

    let delivered = recv_process(&mut rx);
    assert_eq!(delivered.body, "case test");
    assert_eq!(broker.queues.len(), 1);
    // First-seen spelling survives for display.
    assert_eq!(broker.queue_names(), vec!["Jobs".to_string()]);
}

#[test]
fn test_subscribe_unknown_peer_is_rejected() {
    let mut broker = Broker::new();
    let err = broker.subscribe("jobs", Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, BrokerError::UnknownPeer(_)));
}

#[test]
fn test_enqueue_empty_queue_name_is_rejected() {
    let mut broker = Broker::new();
    let msg = Message::notification(Uuid::new_v4(), "", "", "body", 0);
    let err = broker.enqueue(msg).unwrap_err();
    assert!(matches!(err, BrokerError::EmptyQueueName));
}

#[test]
fn test_notification_fans_out_and_drains_on_full_ack() {
    let mut broker = Broker::new();
    let (a, mut rx_a) = register_peer(&mut broker);
    let (b, mut rx_b) = register_peer(&mut broker);
    broker.subscribe("t1", a).unwrap();
    broker.subscribe("t1", b).unwrap();

    let publisher = Uuid::new_v4();
    broker
        .enqueue(Message::notification(publisher, "t1", "", "hello", 0))
        .unwrap();

    let to_a = recv_process(&mut rx_a);
    let to_b = recv_process(&mut rx_b);
    assert_eq!(to_a.body, "hello");
    assert_eq!(to_a.message_id, to_b.message_id);

    // Item stays until every captured target acked.
    broker.handle_ack(&a, &to_a.message_id);
    assert_eq!(broker.queue_depth("t1"), 1);
    broker.handle_ack(&b, &to_b.message_id);
    assert_eq!(broker.queue_depth("t1"), 0);
}

#[test]
fn test_at_most_one_inflight_per_subscriber() {
    let mut broker = Broker::new();
    let (a, mut rx_a) = register_peer(&mut broker);
    broker.subscribe("t1", a).unwrap();

    let publisher = Uuid::new_v4();
    for body in ["m1", "m2", "m3"] {
        broker
            .enqueue(Message::notification(publisher, "t1", "", body, 0))
            .unwrap();
    }

    // Only the head is outstanding; each ack releases exactly one more,
    // in enqueue order.
    let m1 = recv_process(&mut rx_a);
    assert_eq!(m1.body, "m1");
    assert!(rx_a.try_recv().is_err());

    broker.handle_ack(&a, &m1.message_id);
    let m2 = recv_process(&mut rx_a);
    assert_eq!(m2.body, "m2");
    assert!(rx_a.try_recv().is_err());

    broker.handle_ack(&a, &m2.message_id);
    let m3 = recv_process(&mut rx_a);
    assert_eq!(m3.body, "m3");
    broker.handle_ack(&a, &m3.message_id);
    assert_eq!(broker.queue_depth("t1"), 0);
}

#[test]
fn test_late_subscriber_skips_inflight_item() {
    let mut broker = Broker::new();
    let (a, mut rx_a) = register_peer(&mut broker);
    broker.subscribe("t1", a).unwrap();

    let publisher = Uuid::new_v4();
    broker
        .enqueue(Message::notification(publisher, "t1", "", "m1", 0))
        .unwrap();
    let m1 = recv_process(&mut rx_a);

    // b arrives while m1 is outstanding: m1's target set is frozen.
    let (b, mut rx_b) = register_peer(&mut broker);
    broker.subscribe("t1", b).unwrap();
    assert!(rx_b.try_recv().is_err());

    // The next item includes b.
    broker
        .enqueue(Message::notification(publisher, "t1", "", "m2", 0))
        .unwrap();
    let to_b = recv_process(&mut rx_b);
    assert_eq!(to_b.body, "m2");

    broker.handle_ack(&a, &m1.message_id);
    let to_a = recv_process(&mut rx_a);
    assert_eq!(to_a.body, "m2");
}

#[test]
fn test_expired_item_is_never_delivered() {
    let mut broker = Broker::new();
    let t0 = now_ms();
    let publisher = Uuid::new_v4();
    broker
        .enqueue_at(Message::notification(publisher, "t1", "", "gone", 1), t0)
        .unwrap();
    assert_eq!(broker.queue_depth("t1"), 1);

    broker.sweep_at(t0 + 2_000);
    assert_eq!(broker.queue_depth("t1"), 0);

    let (a, mut rx_a) = register_peer(&mut broker);
    broker.subscribe("t1", a).unwrap();
    assert!(rx_a.try_recv().is_err());
}

#[test]
fn test_query_reply_routes_only_to_originator() {
    let mut broker = Broker::new();
    let (responder, mut rx_responder) = register_peer(&mut broker);
    let (bystander, mut rx_bystander) = register_peer(&mut broker);
    let (origin, mut rx_origin) = register_peer(&mut broker);
    broker.subscribe("rpc", responder).unwrap();
    broker.subscribe("rpc", bystander).unwrap();

    let query = Message::query(origin, "rpc", "ping", "ping-body", 0);
    let query_id = query.message_id;
    broker.enqueue(query).unwrap();

    let seen = recv_process(&mut rx_responder);
    assert!(seen.is_query);
    assert_eq!(seen.message_id, query_id);
    assert!(broker.inflight_queries.contains_key(&query_id));

    let mut reply = Message::reply_to(&seen, "pong", "pong-body", 0);
    reply.peer_id = responder;
    broker.enqueue(reply).unwrap();

    let answer = recv_process(&mut rx_origin);
    assert!(answer.is_reply);
    assert_eq!(answer.in_reply_to, Some(query_id));
    assert_eq!(answer.body, "pong-body");

    // The bystander saw the fan-out of the query but never the reply.
    let fanned = recv_process(&mut rx_bystander);
    assert_eq!(fanned.message_id, query_id);
    assert!(rx_bystander.try_recv().is_err());

    // Query and reply are both gone.
    assert!(broker.inflight_queries.is_empty());
    assert_eq!(broker.queue_depth("rpc"), 0);

    // A straggling ack for the removed query is harmless.
    broker.handle_ack(&bystander, &query_id);
}

#[test]
fn test_orphan_reply_is_dropped() {
    let mut broker = Broker::new();
    let (responder, _rx) = register_peer(&mut broker);

    let query = Message::query(Uuid::new_v4(), "rpc", "", "", 0);
    let mut reply = Message::reply_to(&query, "", "too late", 0);
    reply.peer_id = responder;
    broker.enqueue(reply).unwrap();

    assert_eq!(broker.queue_depth("rpc"), 0);
    assert!(broker.inflight_queries.is_empty());
}

#[test]
fn test_query_expires_out_of_the_inflight_map() {
    let mut broker = Broker::new();
    let t0 = now_ms();
    let query = Message::query(Uuid::new_v4(), "rpc", "", "", 1);
    broker.enqueue_at(query, t0).unwrap();
    assert_eq!(broker.inflight_queries.len(), 1);

    broker.sweep_at(t0 + 2_000);
    assert!(broker.inflight_queries.is_empty());
    assert_eq!(broker.queue_depth("rpc"), 0);
}

#[test]
fn test_unacked_delivery_is_abandoned_after_timeout() {
    let mut broker = Broker::new();
    let (a, mut rx_a) = register_peer(&mut broker);
    let (b, mut rx_b) = register_peer(&mut broker);
    broker.subscribe("t1", a).unwrap();
    broker.subscribe("t1", b).unwrap();

    let t0 = now_ms();
    broker
        .enqueue_at(Message::notification(Uuid::new_v4(), "t1", "", "m1", 0), t0)
        .unwrap();
    let to_a = recv_process(&mut rx_a);
    let to_b = recv_process(&mut rx_b);
    broker.handle_ack(&b, &to_b.message_id);

    // a never acks; past the timeout it is presumed dead for this item
    // and the queue advances without redelivery.
    broker.sweep_at(t0 + Broker::DEFAULT_ACK_TIMEOUT_MS + 1_000);
    assert_eq!(broker.presumed_dead, 1);
    assert_eq!(broker.queue_depth("t1"), 0);
    assert!(rx_a.try_recv().is_err());
    let _ = to_a;
}

#[test]
fn test_cleanup_peer_releases_subscriptions_and_deliveries() {
    let mut broker = Broker::new();
    let (a, mut rx_a) = register_peer(&mut broker);
    let (b, mut rx_b) = register_peer(&mut broker);
    broker.subscribe("t1", a).unwrap();
    broker.subscribe("t1", b).unwrap();

    broker
        .enqueue(Message::notification(Uuid::new_v4(), "t1", "", "m1", 0))
        .unwrap();
    let to_b = recv_process(&mut rx_b);
    broker.handle_ack(&b, &to_b.message_id);
    let _ = recv_process(&mut rx_a);

    // a drops without acking: its copy is released and the item completes.
    broker.cleanup_peer(&a);
    assert!(!broker.peers.contains_key(&a));
    assert!(!broker.queues.get("t1").unwrap().subscribers.contains(&a));
    assert_eq!(broker.queue_depth("t1"), 0);
}

#[test]
fn test_cleanup_peer_drops_its_open_queries() {
    let mut broker = Broker::new();
    let (responder, _rx_responder) = register_peer(&mut broker);
    let (origin, _rx_origin) = register_peer(&mut broker);
    broker.subscribe("rpc", responder).unwrap();

    let query = Message::query(origin, "rpc", "", "", 0);
    broker.enqueue(query).unwrap();
    assert_eq!(broker.inflight_queries.len(), 1);

    broker.cleanup_peer(&origin);
    assert!(broker.inflight_queries.is_empty());
}

#[test]
fn test_clear_preserves_subscribers() {
    let mut broker = Broker::new();
    let (a, mut rx_a) = register_peer(&mut broker);
    broker.subscribe("t1", a).unwrap();
    broker
        .enqueue(Message::notification(Uuid::new_v4(), "t1", "", "m1", 0))
        .unwrap();
    let _ = recv_process(&mut rx_a);

    broker.clear("t1");
    assert_eq!(broker.queue_depth("t1"), 0);
    assert!(broker.queues.get("t1").unwrap().subscribers.contains(&a));

    // Fresh traffic still flows to the surviving subscriber.
    broker
        .enqueue(Message::notification(Uuid::new_v4(), "t1", "", "m2", 0))
        .unwrap();
    let next = recv_process(&mut rx_a);
    assert_eq!(next.body, "m2");
}

#[test]
fn test_stale_session_cleanup_spares_a_reconnected_peer() {
    let mut broker = Broker::new();
    let (old_tx, _old_rx) = mpsc::unbounded_channel::<Command>();
    let id = Uuid::new_v4();
    broker.register_peer(Peer::new(id, old_tx.clone()));
    broker.subscribe("t1", id).unwrap();

    // Same peer id comes back on a new socket before the old session's
    // teardown runs.
    let (new_tx, _new_rx) = mpsc::unbounded_channel::<Command>();
    broker.register_peer(Peer::new(id, new_tx.clone()));
    broker.subscribe("t1", id).unwrap();

    broker.cleanup_session(&id, &old_tx);
    assert!(broker.peers.contains_key(&id));
    assert!(broker.queues.get("t1").unwrap().subscribers.contains(&id));

    // The live session's teardown still works.
    broker.cleanup_session(&id, &new_tx);
    assert!(!broker.peers.contains_key(&id));
}

#[test]
fn test_ack_for_unknown_delivery_is_ignored() {
    let mut broker = Broker::new();
    let (a, _rx) = register_peer(&mut broker);
    broker.handle_ack(&a, &Uuid::new_v4());
}

#[test]
fn test_delivery_to_closed_channel_does_not_mark_inflight() {
    let mut broker = Broker::new();
    let (tx, rx) = mpsc::unbounded_channel::<Command>();
    let a = Uuid::new_v4();
    broker.register_peer(Peer::new(a, tx));
    broker.subscribe("t1", a).unwrap();
    drop(rx);

    broker
        .enqueue(Message::notification(Uuid::new_v4(), "t1", "", "m1", 0))
        .unwrap();
    assert!(broker.queues.get("t1").unwrap().inflight.is_empty());
}
