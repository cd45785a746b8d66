//! Broker client
//!
//! `Client` dials the broker, performs the `Hello` handshake and then
//! offers the full command surface: enqueue, subscribe/unsubscribe,
//! clear, and correlated queries. A supervisor task keeps the link
//! alive: it reaps stale ack slots every tick, re-dials after a lost
//! connection and replays the subscription set, firing `connected` /
//! `disconnected` around every link transition.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nexq_wire::{
    encode_frame, Command, CommandKind, FrameDecoder, Message, DEFAULT_MAX_FRAME_BYTES,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ack::AckTracker;
use crate::events::EventHandlers;
use crate::query::QueryTable;
use crate::ClientError;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long a sent command may wait for its `CommandAck`.
    pub ack_timeout_ms: u64,
    /// Default wait for a query's reply.
    pub query_timeout_ms: u64,
    /// Supervisor tick: reconnect attempts and ack reaping.
    pub reconnect_interval_ms: u64,
    pub max_frame_bytes: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 15_000,
            query_timeout_ms: 60_000,
            reconnect_interval_ms: 1_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

struct Link {
    tx: UnboundedSender<Command>,
    closed: Arc<AtomicBool>,
}

pub(crate) struct ClientInner {
    peer_id: Uuid,
    addr: String,
    options: ClientOptions,
    events: EventHandlers,
    acks: AckTracker,
    queries: QueryTable,
    link: Mutex<Option<Link>>,
    subscribed: Mutex<HashSet<String>>,
    running: AtomicBool,
}

pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connect with default options and no event handlers.
    pub async fn connect(addr: impl Into<String>) -> Result<Self, ClientError> {
        Self::connect_with(addr, ClientOptions::default(), EventHandlers::new()).await
    }

    pub async fn connect_with(
        addr: impl Into<String>,
        options: ClientOptions,
        events: EventHandlers,
    ) -> Result<Self, ClientError> {
        let inner = Arc::new(ClientInner {
            peer_id: Uuid::new_v4(),
            addr: addr.into(),
            options,
            events,
            acks: AckTracker::new(),
            queries: QueryTable::new(),
            link: Mutex::new(None),
            subscribed: Mutex::new(HashSet::new()),
            running: AtomicBool::new(true),
        });
        establish(&inner).await?;
        tokio::spawn(supervise(inner.clone()));
        Ok(Self { inner })
    }

    pub fn peer_id(&self) -> Uuid {
        self.inner.peer_id
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.lock().unwrap().is_some()
    }

    /// Commands whose ack never arrived (reaped or abandoned).
    pub fn presumed_dead_commands(&self) -> u64 {
        self.inner.acks.presumed_dead_commands()
    }

    /// Subscribe to `queue`. The name is remembered and replayed after a
    /// reconnect. Returns whether the broker acknowledged in time.
    pub async fn subscribe(&self, queue: &str) -> Result<bool, ClientError> {
        if queue.is_empty() {
            return Err(ClientError::EmptyQueueName);
        }
        self.inner
            .subscribed
            .lock()
            .unwrap()
            .insert(queue.to_string());
        let acked = send_tracked(&self.inner, Command::subscribe(self.inner.peer_id, queue)).await?;
        self.inner.events.fire_queue_subscribed(queue);
        Ok(acked)
    }

    pub async fn unsubscribe(&self, queue: &str) -> Result<bool, ClientError> {
        if queue.is_empty() {
            return Err(ClientError::EmptyQueueName);
        }
        self.inner.subscribed.lock().unwrap().remove(queue);
        let acked =
            send_tracked(&self.inner, Command::unsubscribe(self.inner.peer_id, queue)).await?;
        self.inner.events.fire_queue_unsubscribed(queue);
        Ok(acked)
    }

    /// Empty a queue on the broker. Subscribers stay subscribed.
    pub async fn clear(&self, queue: &str) -> Result<bool, ClientError> {
        if queue.is_empty() {
            return Err(ClientError::EmptyQueueName);
        }
        let acked = send_tracked(&self.inner, Command::clear(self.inner.peer_id, queue)).await?;
        self.inner.events.fire_queue_cleared(queue);
        Ok(acked)
    }

    /// Publish a notification. Returns whether the broker acknowledged
    /// receipt in time.
    pub async fn enqueue(
        &self,
        queue: &str,
        label: &str,
        body: &str,
        expire_secs: u32,
    ) -> Result<bool, ClientError> {
        if queue.is_empty() {
            return Err(ClientError::EmptyQueueName);
        }
        let message = Message::notification(self.inner.peer_id, queue, label, body, expire_secs);
        let acked = send_tracked(&self.inner, Command::enqueue(message.clone())).await?;
        self.inner.events.fire_enqueued(message);
        Ok(acked)
    }

    /// Issue a query and wait for the correlated reply, up to the
    /// default query timeout. `None` means no reply arrived in time.
    pub async fn query(
        &self,
        queue: &str,
        label: &str,
        body: &str,
        expire_secs: u32,
    ) -> Result<Option<Message>, ClientError> {
        self.query_with_timeout(queue, label, body, expire_secs, self.inner.options.query_timeout_ms)
            .await
    }

    pub async fn query_with_timeout(
        &self,
        queue: &str,
        label: &str,
        body: &str,
        expire_secs: u32,
        timeout_ms: u64,
    ) -> Result<Option<Message>, ClientError> {
        if queue.is_empty() {
            return Err(ClientError::EmptyQueueName);
        }
        let message = Message::query(self.inner.peer_id, queue, label, body, expire_secs);
        let query_id = message.message_id;
        let slot = self.inner.queries.register(query_id);

        if let Err(e) = send_tracked(&self.inner, Command::enqueue(message.clone())).await {
            self.inner.queries.remove(&query_id);
            return Err(e);
        }
        self.inner.events.fire_enqueued(message);

        let _ = timeout(
            Duration::from_millis(timeout_ms),
            slot.reply_received.notified(),
        )
        .await;
        let reply = slot.reply.lock().unwrap().take();
        self.inner.queries.remove(&query_id);
        // Release the reader on both the success and the timeout path.
        slot.reply_processed.notify_one();
        Ok(reply)
    }

    /// Fire-and-forget query: the reply, if any, surfaces only through
    /// the `query_reply_received` event.
    pub async fn query_nowait(
        &self,
        queue: &str,
        label: &str,
        body: &str,
        expire_secs: u32,
    ) -> Result<bool, ClientError> {
        if queue.is_empty() {
            return Err(ClientError::EmptyQueueName);
        }
        let message = Message::query(self.inner.peer_id, queue, label, body, expire_secs);
        let acked = send_tracked(&self.inner, Command::enqueue(message.clone())).await?;
        self.inner.events.fire_enqueued(message);
        Ok(acked)
    }

    /// Stop the supervisor, close the link and release every waiter:
    /// blocked queries return `None`, outstanding acks are abandoned.
    pub fn disconnect(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        teardown_link(&self.inner);
        self.inner.queries.drain();
        let abandoned = self.inner.acks.drain();
        if abandoned > 0 {
            debug!(abandoned, "abandoned outstanding acks on disconnect");
        }
    }
}

async fn establish(inner: &Arc<ClientInner>) -> Result<(), ClientError> {
    let stream = TcpStream::connect(&inner.addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
    let closed = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let frame = match encode_frame(&command) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("failed to encode outbound frame: {e}");
                    continue;
                }
            };
            if let Err(e) = write_half.write_all(&frame).await {
                debug!("write failed: {e}");
                break;
            }
        }
    });

    *inner.link.lock().unwrap() = Some(Link {
        tx,
        closed: closed.clone(),
    });
    tokio::spawn(run_reader(inner.clone(), read_half, closed));

    // The server echoes the Hello back; that echo is the handshake ack.
    let acked = send_tracked(inner, Command::hello(inner.peer_id)).await?;
    if !acked {
        teardown_link(inner);
        return Err(ClientError::HandshakeFailed);
    }
    info!(peer = %inner.peer_id, addr = %inner.addr, "connected");
    inner.events.fire_connected();
    Ok(())
}

/// Register the ack slot, hand the command to the writer, then wait for
/// the ack up to the configured timeout.
async fn send_tracked(inner: &Arc<ClientInner>, command: Command) -> Result<bool, ClientError> {
    let message_id = command.message.message_id;
    let tx = {
        let guard = inner.link.lock().unwrap();
        match guard.as_ref() {
            Some(link) => link.tx.clone(),
            None => return Err(ClientError::NotConnected),
        }
    };
    let waiter = inner.acks.register(message_id);
    if tx.send(command).is_err() {
        inner.acks.abandon(&message_id);
        return Err(ClientError::NotConnected);
    }
    match timeout(Duration::from_millis(inner.options.ack_timeout_ms), waiter).await {
        Ok(Ok(())) => Ok(true),
        _ => {
            inner.acks.abandon(&message_id);
            Ok(false)
        }
    }
}

fn send_raw(inner: &ClientInner, command: Command) {
    let guard = inner.link.lock().unwrap();
    if let Some(link) = guard.as_ref() {
        let _ = link.tx.send(command);
    }
}

async fn run_reader(inner: Arc<ClientInner>, mut read_half: OwnedReadHalf, closed: Arc<AtomicBool>) {
    let mut decoder = FrameDecoder::new(inner.options.max_frame_bytes);
    'link: loop {
        match read_half.read_buf(decoder.buffer_mut()).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("read failed: {e}");
                break;
            }
        }
        loop {
            match decoder.try_next() {
                Ok(Some(command)) => dispatch(&inner, command).await,
                Ok(None) => break,
                Err(e) => {
                    inner
                        .events
                        .fire_exception_occurred(format!("protocol error: {e}"));
                    break 'link;
                }
            }
        }
    }
    on_link_down(&inner, &closed);
}

async fn dispatch(inner: &Arc<ClientInner>, command: Command) {
    match command.kind {
        // The echoed Hello doubles as the handshake ack.
        CommandKind::CommandAck | CommandKind::Hello => {
            if !inner.acks.resolve(&command.message.message_id) {
                debug!(message = %command.message.message_id, "ack for unknown command");
            }
        }
        CommandKind::ProcessMessage => handle_process(inner, command.message).await,
        other => debug!(kind = ?other, "unexpected command from server, ignoring"),
    }
}

async fn handle_process(inner: &Arc<ClientInner>, message: Message) {
    if message.is_reply {
        let Some(query_id) = message.in_reply_to else {
            return;
        };
        let slot = inner.queries.lookup(&query_id);
        inner
            .events
            .fire_query_reply_received(message.clone(), slot.is_some());
        if let Some(slot) = slot {
            *slot.reply.lock().unwrap() = Some(message);
            slot.reply_received.notify_one();
            // Hold dispatch until the waiter takes the reply, bounded so
            // a vanished waiter cannot wedge the reader.
            let _ = timeout(
                Duration::from_millis(inner.options.ack_timeout_ms),
                slot.reply_processed.notified(),
            )
            .await;
        }
        // Replies are never acked; correlation already confirms receipt.
        return;
    }

    let ack = Command::ack(inner.peer_id, message.message_id);
    if message.is_query {
        let reply = inner.events.fire_query_received(message);
        send_raw(inner, ack);
        if let Some(mut reply) = reply {
            reply.peer_id = inner.peer_id;
            // Send off the reader task: the enqueue's own ack arrives on
            // this socket and must not wait behind us.
            let inner = inner.clone();
            tokio::spawn(async move {
                match send_tracked(&inner, Command::enqueue(reply.clone())).await {
                    Ok(true) => inner.events.fire_enqueued(reply),
                    Ok(false) => debug!("reply enqueue was not acknowledged"),
                    Err(e) => inner
                        .events
                        .fire_exception_occurred(format!("failed to send reply: {e}")),
                }
            });
        }
        return;
    }

    inner.events.fire_message_received(message);
    send_raw(inner, ack);
}

async fn supervise(inner: Arc<ClientInner>) {
    let interval = Duration::from_millis(inner.options.reconnect_interval_ms);
    let ack_timeout = Duration::from_millis(inner.options.ack_timeout_ms);
    while inner.running.load(Ordering::SeqCst) {
        tokio::time::sleep(interval).await;
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        let reaped = inner.acks.reap_stale(ack_timeout);
        if reaped > 0 {
            debug!(reaped, "reaped stale ack slots");
        }
        if inner.link.lock().unwrap().is_some() {
            continue;
        }
        match establish(&inner).await {
            Ok(()) => {
                let queues: Vec<String> =
                    inner.subscribed.lock().unwrap().iter().cloned().collect();
                for queue in queues {
                    match send_tracked(&inner, Command::subscribe(inner.peer_id, queue.as_str()))
                        .await
                    {
                        Ok(true) => debug!(queue = %queue, "re-subscribed"),
                        Ok(false) => warn!(queue = %queue, "re-subscribe was not acknowledged"),
                        Err(e) => {
                            warn!(queue = %queue, "re-subscribe failed: {e}");
                            break;
                        }
                    }
                }
            }
            Err(e) => debug!("reconnect attempt failed: {e}"),
        }
    }
    debug!("supervisor stopped");
}

/// Disconnect path: drop the current link and fire `disconnected` once.
fn teardown_link(inner: &ClientInner) {
    let link = inner.link.lock().unwrap().take();
    if let Some(link) = link {
        if !link.closed.swap(true, Ordering::SeqCst) {
            inner.events.fire_disconnected();
        }
    }
}

/// Reader-exit path: clear the link if it is still ours, wake blocked
/// queries and fire `disconnected` once.
fn on_link_down(inner: &ClientInner, closed: &Arc<AtomicBool>) {
    {
        let mut guard = inner.link.lock().unwrap();
        let is_current = guard
            .as_ref()
            .map(|link| Arc::ptr_eq(&link.closed, closed))
            .unwrap_or(false);
        if is_current {
            *guard = None;
        }
    }
    if !closed.swap(true, Ordering::SeqCst) {
        inner.queries.drain();
        inner.events.fire_disconnected();
    }
}
