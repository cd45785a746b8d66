//! Event surface
//!
//! Optional callbacks registered at build time and fired from the
//! client's receive path. Handlers must not block for long: they run on
//! the reader task and stall inbound dispatch while they execute. A
//! panicking handler is contained and surfaced through
//! `exception_occurred`; dispatch continues.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use nexq_wire::Message;
use tracing::error;

pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;
pub type QueryHandler = Arc<dyn Fn(Message) -> Option<Message> + Send + Sync>;
pub type ReplyHandler = Arc<dyn Fn(Message, bool) + Send + Sync>;
pub type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;
pub type QueueHandler = Arc<dyn Fn(&str) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Clone, Default)]
pub struct EventHandlers {
    message_received: Option<MessageHandler>,
    query_received: Option<QueryHandler>,
    query_reply_received: Option<ReplyHandler>,
    connected: Option<LifecycleHandler>,
    disconnected: Option<LifecycleHandler>,
    enqueued: Option<MessageHandler>,
    queue_subscribed: Option<QueueHandler>,
    queue_unsubscribed: Option<QueueHandler>,
    queue_cleared: Option<QueueHandler>,
    exception_occurred: Option<ErrorHandler>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notification arrived on a subscribed queue.
    pub fn on_message_received(mut self, f: impl Fn(Message) + Send + Sync + 'static) -> Self {
        self.message_received = Some(Arc::new(f));
        self
    }

    /// A query arrived on a subscribed queue. Return the reply to send,
    /// or `None` to leave it unanswered.
    pub fn on_query_received(
        mut self,
        f: impl Fn(Message) -> Option<Message> + Send + Sync + 'static,
    ) -> Self {
        self.query_received = Some(Arc::new(f));
        self
    }

    /// A reply arrived; the flag says whether a `query` call was still
    /// waiting for it.
    pub fn on_query_reply_received(
        mut self,
        f: impl Fn(Message, bool) + Send + Sync + 'static,
    ) -> Self {
        self.query_reply_received = Some(Arc::new(f));
        self
    }

    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.connected = Some(Arc::new(f));
        self
    }

    pub fn on_disconnected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.disconnected = Some(Arc::new(f));
        self
    }

    pub fn on_enqueued(mut self, f: impl Fn(Message) + Send + Sync + 'static) -> Self {
        self.enqueued = Some(Arc::new(f));
        self
    }

    pub fn on_queue_subscribed(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.queue_subscribed = Some(Arc::new(f));
        self
    }

    pub fn on_queue_unsubscribed(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.queue_unsubscribed = Some(Arc::new(f));
        self
    }

    pub fn on_queue_cleared(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.queue_cleared = Some(Arc::new(f));
        self
    }

    pub fn on_exception_occurred(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.exception_occurred = Some(Arc::new(f));
        self
    }

    pub(crate) fn fire_message_received(&self, message: Message) {
        if let Some(handler) = &self.message_received {
            self.guard("message_received", || handler(message));
        }
    }

    pub(crate) fn fire_query_received(&self, query: Message) -> Option<Message> {
        let handler = self.query_received.as_ref()?;
        self.guard("query_received", || handler(query)).flatten()
    }

    pub(crate) fn fire_query_reply_received(&self, reply: Message, has_open_query: bool) {
        if let Some(handler) = &self.query_reply_received {
            self.guard("query_reply_received", || handler(reply, has_open_query));
        }
    }

    pub(crate) fn fire_connected(&self) {
        if let Some(handler) = &self.connected {
            self.guard("connected", || handler());
        }
    }

    pub(crate) fn fire_disconnected(&self) {
        if let Some(handler) = &self.disconnected {
            self.guard("disconnected", || handler());
        }
    }

    pub(crate) fn fire_enqueued(&self, message: Message) {
        if let Some(handler) = &self.enqueued {
            self.guard("enqueued", || handler(message));
        }
    }

    pub(crate) fn fire_queue_subscribed(&self, name: &str) {
        if let Some(handler) = &self.queue_subscribed {
            self.guard("queue_subscribed", || handler(name));
        }
    }

    pub(crate) fn fire_queue_unsubscribed(&self, name: &str) {
        if let Some(handler) = &self.queue_unsubscribed {
            self.guard("queue_unsubscribed", || handler(name));
        }
    }

    pub(crate) fn fire_queue_cleared(&self, name: &str) {
        if let Some(handler) = &self.queue_cleared {
            self.guard("queue_cleared", || handler(name));
        }
    }

    pub(crate) fn fire_exception_occurred(&self, detail: String) {
        error!("{detail}");
        if let Some(handler) = &self.exception_occurred {
            let _ = catch_unwind(AssertUnwindSafe(|| handler(detail)));
        }
    }

    fn guard<R>(&self, name: &str, f: impl FnOnce() -> R) -> Option<R> {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Some(value),
            Err(payload) => {
                self.fire_exception_occurred(format!(
                    "{name} handler panicked: {}",
                    panic_text(payload.as_ref())
                ));
                None
            }
        }
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
