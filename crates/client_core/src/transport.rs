//! Request/notify/subscribe client over a fire-and-forget host channel.

use std::{
    fmt,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use shared::protocol::{InboundEvent, OutboundMessage, GET_YOUTUBE_VIDEO_DETAILS};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    correlator::{Correlator, Predicate, Unsubscribe, UnsubscribeOnDrop},
    error::TransportError,
};

/// Outbound host binding.
pub trait HostSink: Send + Sync {
    fn send_to_host(&self, method: &str, params: Value);
}

impl<F> HostSink for F
where
    F: Fn(&str, Value) + Send + Sync,
{
    fn send_to_host(&self, method: &str, params: Value) {
        self(method, params)
    }
}

/// Host binding that forwards every outbound message into a channel.
#[derive(Clone)]
pub struct ChannelHostSink {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelHostSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl HostSink for ChannelHostSink {
    fn send_to_host(&self, method: &str, params: Value) {
        if self
            .tx
            .send(OutboundMessage {
                method: method.to_string(),
                params,
            })
            .is_err()
        {
            debug!(method, "transport: host channel closed; message dropped");
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// `None` waits for a reply indefinitely.
    pub request_timeout: Option<Duration>,
}

/// Extra condition a reply must meet besides `responseMessageType == method`.
#[derive(Clone)]
pub enum ResponseNarrowing {
    FieldEquals { pointer: String, expected: Value },
    Custom(Arc<dyn Fn(&InboundEvent) -> bool + Send + Sync>),
}

impl ResponseNarrowing {
    /// Narrowing the host protocol defines for specific methods.
    pub fn builtin(method: &str, params: &Value) -> Option<Self> {
        match method {
            GET_YOUTUBE_VIDEO_DETAILS => Some(Self::FieldEquals {
                pointer: "/videoURL".to_string(),
                expected: params.clone(),
            }),
            _ => None,
        }
    }

    fn into_predicate(self, method: &str) -> Predicate {
        match self {
            Self::FieldEquals { pointer, expected } => Predicate::ReplyWhere {
                method: method.to_string(),
                pointer,
                expected,
            },
            Self::Custom(f) => {
                let method = method.to_string();
                Predicate::custom(move |event| event.is_reply_to(&method) && f(event))
            }
        }
    }
}

impl fmt::Debug for ResponseNarrowing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldEquals { pointer, expected } => f
                .debug_struct("FieldEquals")
                .field("pointer", pointer)
                .field("expected", expected)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Inbound host binding: hands events to the transport's dispatch task.
#[derive(Clone)]
pub struct InboundHandle {
    tx: mpsc::UnboundedSender<InboundEvent>,
}

impl InboundHandle {
    pub fn deliver(&self, event: InboundEvent) {
        if self.tx.send(event).is_err() {
            debug!("transport: inbound event after close; dropped");
        }
    }

    pub fn deliver_value(&self, value: Value) {
        match InboundEvent::from_value(&value) {
            Some(event) => self.deliver(event),
            None => warn!(?value, "transport: no message available"),
        }
    }

    pub fn deliver_json(&self, raw: &str) {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.deliver_value(value),
            Err(err) => warn!(error = %err, "transport: inbound payload is not JSON; dropped"),
        }
    }
}

pub struct Transport {
    correlator: Arc<Correlator>,
    host: Arc<dyn HostSink>,
    inbound: InboundHandle,
    options: TransportOptions,
    closed: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Must be called inside a Tokio runtime; inbound events are dispatched
    /// one at a time, in arrival order, by a spawned task.
    pub fn new(host: Arc<dyn HostSink>, options: TransportOptions) -> Arc<Self> {
        let correlator = Arc::new(Correlator::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();

        let dispatcher = Arc::clone(&correlator);
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatcher.dispatch(&event);
            }
        });

        Arc::new(Self {
            correlator,
            host,
            inbound: InboundHandle { tx },
            options,
            closed: AtomicBool::new(false),
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn inbound(&self) -> InboundHandle {
        self.inbound.clone()
    }

    /// Dispatches synchronously on the caller's task, bypassing the inbound queue.
    #[cfg(test)]
    pub(crate) fn dispatch(&self, event: &InboundEvent) -> usize {
        self.correlator.dispatch(event)
    }

    pub fn pending_waiters(&self) -> usize {
        self.correlator.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn notify(&self, method: &str, params: impl Serialize) {
        if self.is_closed() {
            debug!(method, "transport: notify after close ignored");
            return;
        }
        match serde_json::to_value(params) {
            Ok(params) => self.host.send_to_host(method, params),
            Err(err) => warn!(method, error = %err, "transport: notify params not serializable"),
        }
    }

    pub async fn request(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<Value, TransportError> {
        let params = serde_json::to_value(params).map_err(|source| TransportError::Encode {
            method: method.to_string(),
            source,
        })?;
        let narrowing = ResponseNarrowing::builtin(method, &params);
        self.request_matching(method, params, narrowing).await
    }

    /// Sends `method` and resolves with the payload of the first matching reply.
    ///
    /// Two in-flight requests with identical predicates are both resolved by
    /// the first matching reply. Dropping the returned future unregisters its
    /// waiter.
    pub async fn request_matching(
        &self,
        method: &str,
        params: Value,
        narrowing: Option<ResponseNarrowing>,
    ) -> Result<Value, TransportError> {
        let closed = || TransportError::Closed {
            method: method.to_string(),
        };
        if self.is_closed() {
            return Err(closed());
        }

        let predicate = match narrowing {
            Some(narrowing) => narrowing.into_predicate(method),
            None => Predicate::ReplyTo(method.to_string()),
        };
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        // Registered before sending: a host may reply from inside send_to_host.
        let unsubscribe = self
            .correlator
            .register_once(predicate, move |event, unsubscribe| {
                unsubscribe.call();
                if let Some(tx) = tx.take() {
                    let _ = tx.send(event.payload());
                }
            });
        let _guard = UnsubscribeOnDrop(unsubscribe);
        // close() may have cleared the registry between the check above and the insert.
        if self.is_closed() {
            return Err(closed());
        }

        debug!(method, "transport: request sent");
        self.host.send_to_host(method, params);

        let reply = match self.options.request_timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!(method, ?after, "transport: request timed out");
                    return Err(TransportError::Timeout {
                        method: method.to_string(),
                        after,
                    });
                }
            },
            None => rx.await,
        };
        reply.map_err(|_| closed())
    }

    /// Forwards the payload of every matching event to `callback` until unsubscribed.
    pub fn subscribe(
        &self,
        subscription: &str,
        mut callback: impl FnMut(Value) + Send + 'static,
    ) -> Unsubscribe {
        self.correlator.register(
            Predicate::Subscription(subscription.to_string()),
            move |event, _| callback(event.payload()),
        )
    }

    /// Channel-backed subscription; unsubscribes when dropped.
    pub fn subscribe_channel(&self, subscription: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(subscription, move |payload| {
            let _ = tx.send(payload);
        });
        Subscription { rx, handle }
    }

    /// Clears every waiter and stops inbound dispatch. Pending requests fail with `Closed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let released = self.correlator.close();
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
        debug!(released, "transport: closed");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Value>,
    handle: Unsubscribe,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(&self) -> bool {
        self.handle.call()
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.call();
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
