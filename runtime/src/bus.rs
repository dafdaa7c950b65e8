//! Save-event bus.
//!
//! Every successful commit is published here. Sibling contexts and change
//! observers subscribe for a stream of events; dropping the stream ends the
//! subscription.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use strata_engine::SaveEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sender half of one subscription.
pub type EventSender = mpsc::UnboundedSender<Arc<SaveEvent>>;

/// Broadcasts save events to every live subscriber.
///
/// Thread-safe and shared through `Arc`.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: DashMap<Uuid, EventSender>,
}

impl EventBus {
    /// Create a new bus.
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    /// Create a new bus wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a subscriber.
    ///
    /// Events published after this call are delivered to the returned
    /// stream in publication order.
    pub fn subscribe(self: &Arc<Self>) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        self.subscribers.insert(id, sender);
        tracing::debug!(subscription = %id, "Event bus subscription registered");

        EventStream {
            id,
            receiver,
            bus: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: &Uuid) {
        if self.subscribers.remove(id).is_some() {
            tracing::debug!(subscription = %id, "Event bus subscription removed");
        }
    }

    /// Publish an event to every subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: Arc<SaveEvent>) -> usize {
        let mut sent_count = 0;

        for entry in self.subscribers.iter() {
            if entry.value().send(Arc::clone(&event)).is_ok() {
                sent_count += 1;
            }
        }

        tracing::debug!(
            origin = %event.origin,
            generation = event.generation,
            recipients = sent_count,
            "Published save event"
        );

        sent_count
    }

    /// Get the number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// One subscription to an [`EventBus`].
#[derive(Debug)]
pub struct EventStream {
    id: Uuid,
    receiver: mpsc::UnboundedReceiver<Arc<SaveEvent>>,
    bus: Weak<EventBus>,
}

impl EventStream {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<SaveEvent>> {
        self.receiver.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<SaveEvent>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(&self.id);
        }
    }
}
