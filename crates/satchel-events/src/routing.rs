//! Event channel routing.
//!
//! # Design
//! - Subscribers registered with [`EventChannel::subscribe`] are invoked
//!   synchronously on the publishing thread, in registration order, before
//!   [`EventChannel::publish`] returns.
//! - A bounded replay ring plus a `tokio::broadcast` sender serve
//!   asynchronous observers that only need eventual delivery.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, Sender};
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId, EventKind};

/// Stream wrapper used by asynchronous observers.
pub type EventStream = BroadcastStream<EventEnvelope>;

/// Handle returned by [`EventChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Declared interest of a synchronous subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// Every event.
    All,
    /// Only the listed kinds.
    Kinds(Vec<EventKind>),
}

impl Interest {
    /// Interest restricted to the provided kinds.
    #[must_use]
    pub fn only(kinds: &[EventKind]) -> Self {
        Self::Kinds(kinds.to_vec())
    }

    /// Whether an event of `kind` should be delivered.
    #[must_use]
    pub fn matches(&self, kind: EventKind) -> bool {
        match self {
            Self::All => true,
            Self::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

type Handler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    interest: Interest,
    handler: Handler,
}

/// Explicitly constructed publish/subscribe channel. Clones share state.
#[derive(Clone)]
pub struct EventChannel {
    sender: Sender<EventEnvelope>,
    replay: Arc<Mutex<VecDeque<EventEnvelope>>>,
    replay_capacity: usize,
    next_id: Arc<Mutex<EventId>>,
    subscribers: Arc<RwLock<Vec<Arc<Subscriber>>>>,
    next_subscription: Arc<AtomicU64>,
}

impl EventChannel {
    /// Construct a channel with a custom replay capacity.
    ///
    /// A zero capacity is raised to one; `tokio::broadcast` rejects empty
    /// channels.
    #[must_use]
    pub fn with_capacity(replay_capacity: usize) -> Self {
        let replay_capacity = replay_capacity.max(1);
        let (sender, _) = broadcast::channel(replay_capacity);
        Self {
            sender,
            replay: Arc::new(Mutex::new(VecDeque::with_capacity(replay_capacity))),
            replay_capacity,
            next_id: Arc::new(Mutex::new(1)),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Construct a channel with the default replay capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Register a synchronous subscriber for events matching `interest`.
    pub fn subscribe<F>(&self, interest: Interest, handler: F) -> SubscriptionId
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let subscriber = Arc::new(Subscriber {
            id,
            interest,
            handler: Arc::new(handler),
        });
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
        id
    }

    /// Remove a synchronous subscriber. Returns `false` when it was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }

    /// Publish an event stamped with the current time.
    pub fn publish(&self, event: Event) -> EventId {
        self.publish_at(event, Utc::now())
    }

    /// Publish an event with an explicit timestamp.
    ///
    /// Every matching subscriber has been invoked when this returns.
    pub fn publish_at(&self, event: Event, timestamp: DateTime<Utc>) -> EventId {
        let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *next;
        *next = next.saturating_add(1);
        drop(next);

        let envelope = EventEnvelope {
            id,
            timestamp,
            event,
        };
        {
            let mut replay = self.lock_replay();
            if replay.len() == self.replay_capacity {
                let _ = replay.pop_front();
            }
            replay.push_back(envelope.clone());
        }

        // Handlers run outside the lock so they may subscribe or publish.
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let kind = envelope.event.kind();
        for subscriber in subscribers
            .iter()
            .filter(|subscriber| subscriber.interest.matches(kind))
        {
            (subscriber.handler)(&envelope);
        }

        trace!(event_id = id, kind = kind.as_str(), "event published");
        let _ = self.sender.send(envelope);
        id
    }

    /// Live stream of events published after this call.
    #[must_use]
    pub fn stream(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Last event id observed in the replay buffer.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_replay().back().map(|env| env.id)
    }

    /// Collect a backlog of events emitted after the specified id.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        let replay = self.lock_replay();
        replay.iter().filter(|env| env.id > id).cloned().collect()
    }

    /// Number of registered synchronous subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lock_replay(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.replay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}
