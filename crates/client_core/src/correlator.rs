//! Waiter registry that routes inbound host events to interested parties.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak,
    },
};

use serde_json::Value;
use shared::protocol::InboundEvent;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Removed the first time its predicate matches.
    OneShot,
    /// Stays registered until unsubscribed.
    Persistent,
}

pub type MatchFn = Arc<dyn Fn(&InboundEvent) -> bool + Send + Sync>;

/// Decides whether an inbound event belongs to a waiter.
#[derive(Clone)]
pub enum Predicate {
    /// `responseMessageType == method`.
    ReplyTo(String),
    /// `responseMessageType == method` and the JSON pointer into `response`
    /// resolves to `expected`.
    ReplyWhere {
        method: String,
        pointer: String,
        expected: Value,
    },
    /// `messageType == name || responseMessageType == name`.
    Subscription(String),
    Custom(MatchFn),
}

impl Predicate {
    pub fn custom(f: impl Fn(&InboundEvent) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn matches(&self, event: &InboundEvent) -> bool {
        match self {
            Self::ReplyTo(method) => event.is_reply_to(method),
            Self::ReplyWhere {
                method,
                pointer,
                expected,
            } => {
                event.is_reply_to(method)
                    && event
                        .response
                        .as_ref()
                        .and_then(|response| response.pointer(pointer))
                        == Some(expected)
            }
            Self::Subscription(name) => event.is_push_for(name),
            Self::Custom(f) => f(event),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplyTo(method) => f.debug_tuple("ReplyTo").field(method).finish(),
            Self::ReplyWhere {
                method,
                pointer,
                expected,
            } => f
                .debug_struct("ReplyWhere")
                .field("method", method)
                .field("pointer", pointer)
                .field("expected", expected)
                .finish(),
            Self::Subscription(name) => f.debug_tuple("Subscription").field(name).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

type Callback = Box<dyn FnMut(&InboundEvent, &Unsubscribe) + Send>;
type Waiters = Mutex<Vec<Arc<Waiter>>>;

struct Waiter {
    id: WaiterId,
    lifecycle: Lifecycle,
    predicate: Predicate,
    on_match: Mutex<Callback>,
    unsubscribe: Unsubscribe,
}

/// Idempotent handle that removes one waiter from its registry.
#[derive(Clone)]
pub struct Unsubscribe {
    id: WaiterId,
    registry: Weak<Waiters>,
    released: Arc<AtomicBool>,
}

impl Unsubscribe {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Returns `true` only for the call that actually removed the waiter.
    pub fn call(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut waiters = lock(&registry);
        let before = waiters.len();
        waiters.retain(|waiter| waiter.id != self.id);
        let removed = waiters.len() != before;
        if removed {
            debug!(waiter = self.id.0, "correlator: waiter unregistered");
        }
        removed
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Unregisters the waiter when dropped.
#[derive(Debug)]
pub struct UnsubscribeOnDrop(pub Unsubscribe);

impl Drop for UnsubscribeOnDrop {
    fn drop(&mut self) {
        self.0.call();
    }
}

pub struct Correlator {
    waiters: Arc<Waiters>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            waiters: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Registers a persistent waiter.
    pub fn register(
        &self,
        predicate: Predicate,
        on_match: impl FnMut(&InboundEvent, &Unsubscribe) + Send + 'static,
    ) -> Unsubscribe {
        self.insert(Lifecycle::Persistent, predicate, Box::new(on_match))
    }

    /// Registers a waiter that is removed before its callback runs for the first match.
    pub fn register_once(
        &self,
        predicate: Predicate,
        on_match: impl FnMut(&InboundEvent, &Unsubscribe) + Send + 'static,
    ) -> Unsubscribe {
        self.insert(Lifecycle::OneShot, predicate, Box::new(on_match))
    }

    fn insert(
        &self,
        lifecycle: Lifecycle,
        predicate: Predicate,
        on_match: Callback,
    ) -> Unsubscribe {
        let id = WaiterId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let unsubscribe = Unsubscribe {
            id,
            registry: Arc::downgrade(&self.waiters),
            released: Arc::new(AtomicBool::new(false)),
        };
        let mut waiters = lock(&self.waiters);
        if self.closed.load(Ordering::Acquire) {
            unsubscribe.released.store(true, Ordering::Release);
            debug!(waiter = id.0, "correlator: closed; waiter released unregistered");
            return unsubscribe;
        }
        debug!(waiter = id.0, ?lifecycle, ?predicate, "correlator: waiter registered");
        waiters.push(Arc::new(Waiter {
            id,
            lifecycle,
            predicate,
            on_match: Mutex::new(on_match),
            unsubscribe: unsubscribe.clone(),
        }));
        unsubscribe
    }

    /// Offers `event` to every waiter registered when the call started.
    ///
    /// Returns the number of callbacks invoked. A panicking predicate or
    /// callback only affects its own waiter.
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        let snapshot: Vec<Arc<Waiter>> = lock(&self.waiters).clone();
        let mut delivered = 0;

        for waiter in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| waiter.predicate.matches(event))) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(_) => {
                    warn!(
                        waiter = waiter.id.0,
                        "correlator: predicate panicked; waiter skipped for this event"
                    );
                    continue;
                }
            }

            if waiter.lifecycle == Lifecycle::OneShot && !waiter.unsubscribe.call() {
                continue;
            }

            let mut on_match = match waiter.on_match.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    warn!(
                        waiter = waiter.id.0,
                        "correlator: re-entrant dispatch into a running callback; skipped"
                    );
                    continue;
                }
            };
            let unsubscribe = &waiter.unsubscribe;
            let ran = panic::catch_unwind(AssertUnwindSafe(|| {
                (&mut **on_match)(event, unsubscribe)
            }));
            if ran.is_err() {
                warn!(waiter = waiter.id.0, "correlator: callback panicked");
            }
            delivered += 1;
        }

        debug!(
            message_type = event.message_type.as_deref().unwrap_or_default(),
            response_message_type = event.response_message_type.as_deref().unwrap_or_default(),
            delivered,
            "correlator: event dispatched"
        );
        delivered
    }

    /// Drops every waiter and refuses later registrations. Pending one-shot
    /// callbacks are released without running.
    pub fn close(&self) -> usize {
        let drained: Vec<Arc<Waiter>> = {
            let mut waiters = lock(&self.waiters);
            self.closed.store(true, Ordering::Release);
            waiters.drain(..).collect()
        };
        for waiter in &drained {
            waiter.unsubscribe.released.store(true, Ordering::Release);
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.waiters).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: WaiterId) -> bool {
        lock(&self.waiters).iter().any(|waiter| waiter.id == id)
    }
}

fn lock(waiters: &Waiters) -> MutexGuard<'_, Vec<Arc<Waiter>>> {
    waiters.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/correlator_tests.rs"]
mod tests;
