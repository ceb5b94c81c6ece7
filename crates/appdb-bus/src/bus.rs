use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use appdb_types::Document;

use crate::error::TryRecvError;
use crate::event::{DocumentEvent, EventKind, Scope};

/// What a full subscriber buffer gives up when a new event arrives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest pending event; the subscriber sees a gap.
    #[default]
    DropOldest,
    /// Discard the incoming event for that subscriber only.
    DropNewest,
}

/// Largest per-subscriber buffer the bus will allocate.
pub const MAX_CAPACITY: usize = 1 << 16;

/// Configuration for the [`ChangeBus`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Pending events buffered per subscriber, within `1..=MAX_CAPACITY`.
    /// Ring buffers round this up to a power of two.
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl BusConfig {
    /// The configured capacity clamped to what a subscriber buffer accepts.
    pub fn effective_capacity(&self) -> usize {
        self.capacity.clamp(1, MAX_CAPACITY)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

enum Sender {
    Ring(broadcast::Sender<DocumentEvent>),
    Queue(mpsc::Sender<DocumentEvent>),
}

enum Receiver {
    Ring(broadcast::Receiver<DocumentEvent>),
    Queue(mpsc::Receiver<DocumentEvent>),
}

/// Internal subscriber: a scope paired with the sending half of its buffer.
struct Subscriber {
    id: Uuid,
    scope: Scope,
    sender: Sender,
    dropped: Arc<AtomicU64>,
}

impl Subscriber {
    fn is_closed(&self) -> bool {
        match self.sender {
            Sender::Ring(ref tx) => tx.receiver_count() == 0,
            Sender::Queue(ref tx) => tx.is_closed(),
        }
    }

    /// Hand `event` to this subscriber without waiting.
    /// Returns `None` when the receiver is gone, otherwise whether the event
    /// was buffered.
    fn offer(&self, event: &DocumentEvent) -> Option<bool> {
        match self.sender {
            Sender::Ring(ref tx) => tx.send(event.clone()).ok().map(|_| true),
            Sender::Queue(ref tx) => match tx.try_send(event.clone()) {
                Ok(()) => Some(true),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(subscription = %self.id, seq = event.seq, "subscriber full, event dropped");
                    Some(false)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => None,
            },
        }
    }
}

struct State {
    next_seq: u64,
    subscribers: Vec<Subscriber>,
}

struct Shared {
    config: BusConfig,
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: Uuid) {
        let mut state = self.state();
        state.subscribers.retain(|sub| sub.id != id);
    }
}

/// Process-local fan-out of committed changes.
///
/// Cloning is cheap and every clone publishes into the same bus. Sequence
/// assignment and delivery happen under one short lock, so every
/// subscriber observes events in `seq` order. Delivery never waits on a
/// subscriber.
#[derive(Clone)]
pub struct ChangeBus {
    shared: Arc<Shared>,
}

impl ChangeBus {
    pub fn new(config: BusConfig) -> Self {
        if config.effective_capacity() != config.capacity {
            warn!(
                configured = config.capacity,
                used = config.effective_capacity(),
                "bus capacity out of range, clamped"
            );
        }
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State {
                    next_seq: 1,
                    subscribers: Vec::new(),
                }),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    /// Open a subscription to every future change inside `scope`.
    pub fn subscribe(&self, scope: Scope) -> Subscription {
        let id = Uuid::now_v7();
        let capacity = self.shared.config.effective_capacity();
        let dropped = Arc::new(AtomicU64::new(0));

        let (sender, receiver) = match self.shared.config.overflow {
            OverflowPolicy::DropOldest => {
                let (tx, rx) = broadcast::channel(capacity);
                (Sender::Ring(tx), Receiver::Ring(rx))
            }
            OverflowPolicy::DropNewest => {
                let (tx, rx) = mpsc::channel(capacity);
                (Sender::Queue(tx), Receiver::Queue(rx))
            }
        };

        self.shared.state().subscribers.push(Subscriber {
            id,
            scope: scope.clone(),
            sender,
            dropped: Arc::clone(&dropped),
        });
        debug!(subscription = %id, %scope, "subscribed");

        Subscription {
            id,
            scope,
            receiver,
            dropped,
            bus: Arc::downgrade(&self.shared),
        }
    }

    /// Publish a committed change to every subscriber whose scope covers it.
    ///
    /// Returns the number of subscribers the event was buffered for.
    /// Subscribers whose receivers are gone are pruned.
    pub fn publish(&self, kind: EventKind, document: Document) -> usize {
        let mut state = self.shared.state();
        let event = DocumentEvent {
            seq: state.next_seq,
            kind,
            document,
        };
        state.next_seq += 1;

        let mut delivered = 0;
        state.subscribers.retain(|sub| {
            if !sub.scope.matches(&event.document.key) {
                return !sub.is_closed();
            }
            match sub.offer(&event) {
                Some(buffered) => {
                    delivered += usize::from(buffered);
                    true
                }
                None => false,
            }
        });
        drop(state);

        debug!(seq = event.seq, %kind, key = %event.document.key, delivered, "event published");
        delivered
    }

    /// Current number of registered subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.state().subscribers.len()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("config", &self.shared.config)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// The receiving end of a scoped change subscription.
///
/// Dropping it deregisters it from the bus.
pub struct Subscription {
    id: Uuid,
    scope: Scope,
    receiver: Receiver,
    dropped: Arc<AtomicU64>,
    bus: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Number of events this subscription lost to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the bus is gone (or this subscription was removed)
    /// and every buffered event has been consumed.
    pub async fn recv(&mut self) -> Option<DocumentEvent> {
        match self.receiver {
            Receiver::Ring(ref mut rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        record_lag(&self.dropped, self.id, n)
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            Receiver::Queue(ref mut rx) => rx.recv().await,
        }
    }

    /// Take the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Result<DocumentEvent, TryRecvError> {
        match self.receiver {
            Receiver::Ring(ref mut rx) => loop {
                match rx.try_recv() {
                    Ok(event) => return Ok(event),
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        record_lag(&self.dropped, self.id, n)
                    }
                    Err(broadcast::error::TryRecvError::Empty) => return Err(TryRecvError::Empty),
                    Err(broadcast::error::TryRecvError::Closed) => {
                        return Err(TryRecvError::Closed)
                    }
                }
            },
            Receiver::Queue(ref mut rx) => rx.try_recv().map_err(|e| match e {
                mpsc::error::TryRecvError::Empty => TryRecvError::Empty,
                mpsc::error::TryRecvError::Disconnected => TryRecvError::Closed,
            }),
        }
    }

    /// Deregister from the bus. Events already buffered stay readable.
    pub fn unsubscribe(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
            debug!(subscription = %self.id, "unsubscribed");
        }
        self.bus = Weak::new();
    }
}

fn record_lag(dropped: &AtomicU64, id: Uuid, n: u64) {
    dropped.fetch_add(n, Ordering::Relaxed);
    warn!(subscription = %id, skipped = n, "subscriber lagged, oldest events dropped");
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}
