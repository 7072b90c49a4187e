//! Typed publish/subscribe channels
//!
//! Subscribers hold a [`Subscription`] and must either drop it or call
//! [`EventBus::unsubscribe`] when the owning connection goes away. Dropped
//! receivers are pruned on the next publish.

use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

pub type SubscriptionId = u64;

pub struct Subscription<E> {
    pub id: SubscriptionId,
    receiver: UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    pub fn try_recv(&mut self) -> Option<E> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Takes every event currently queued
    pub fn drain(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

pub struct EventBus<E: Clone> {
    subscribers: HashMap<SubscriptionId, UnboundedSender<E>>,
    next_id: SubscriptionId,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn subscribe(&mut self) -> Subscription<E> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, sender);
        Subscription { id, receiver }
    }

    /// Returns false if the id was unknown or already removed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn publish(&mut self, event: E) {
        self.subscribers
            .retain(|_, sender| sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
