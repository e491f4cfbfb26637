use logvista_core::LogEvent;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

/// Queue capacity used when zero is requested
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;

/// Receiving end of one subscriber's queue
#[derive(Debug)]
pub struct Subscription {
    id: String,
    receiver: mpsc::Receiver<LogEvent>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next event, or `None` once the subscriber is closed and drained
    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn into_receiver(self) -> mpsc::Receiver<LogEvent> {
        self.receiver
    }
}

/// What happened to one subscriber during a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    Dropped,
    Skipped,
}

/// Sending half of a subscriber, guarded so close and send never interleave
#[derive(Debug)]
struct SubscriberSlot {
    id: String,
    state: Mutex<SlotState>,
}

#[derive(Debug)]
struct SlotState {
    closed: bool,
    sender: Option<mpsc::Sender<LogEvent>>,
}

impl SubscriberSlot {
    fn try_deliver(&self, event: &LogEvent) -> Delivery {
        let state = self.state.lock();
        if state.closed {
            return Delivery::Skipped;
        }
        let Some(sender) = state.sender.as_ref() else {
            return Delivery::Skipped;
        };

        match sender.try_send(event.clone()) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            // Receiver dropped without unsubscribing
            Err(TrySendError::Closed(_)) => Delivery::Skipped,
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.sender = None;
    }
}

/// Subscribers keyed by id
#[derive(Debug)]
pub(crate) struct SubscriberRegistry {
    capacity: usize,
    slots: RwLock<HashMap<String, Arc<SubscriberSlot>>>,
}

impl SubscriberRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: if capacity == 0 { DEFAULT_SUBSCRIBER_CAPACITY } else { capacity },
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber; an existing subscriber with the same id is closed
    /// and replaced
    pub(crate) fn subscribe(&self, id: &str) -> Subscription {
        self.subscribe_with_capacity(id, self.capacity)
    }

    pub(crate) fn subscribe_with_capacity(&self, id: &str, capacity: usize) -> Subscription {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let slot = Arc::new(SubscriberSlot {
            id: id.to_string(),
            state: Mutex::new(SlotState {
                closed: false,
                sender: Some(sender),
            }),
        });

        if let Some(previous) = self.slots.write().insert(id.to_string(), slot) {
            debug!(subscriber = %id, "Replacing existing subscriber");
            previous.close();
        }

        Subscription {
            id: id.to_string(),
            receiver,
        }
    }

    /// Remove and close; returns whether the id was registered
    pub(crate) fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.slots.write().remove(id);
        match removed {
            Some(slot) => {
                slot.close();
                true
            }
            None => false,
        }
    }

    /// Offer an event to every subscriber without waiting
    pub(crate) fn broadcast(&self, event: &LogEvent) -> usize {
        let snapshot: Vec<Arc<SubscriberSlot>> = self.slots.read().values().cloned().collect();

        let mut dropped = 0;
        for slot in snapshot {
            if slot.try_deliver(event) == Delivery::Dropped {
                trace!(subscriber = %slot.id, "Subscriber queue full, dropping event");
                dropped += 1;
            }
        }
        dropped
    }

    pub(crate) fn close_all(&self) {
        let drained: Vec<Arc<SubscriberSlot>> = self.slots.write().drain().map(|(_, slot)| slot).collect();
        for slot in drained {
            slot.close();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.read().len()
    }
}
