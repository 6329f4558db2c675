//! In-memory event fan-out.
//!
//! A [`Hub`] broadcasts events to every current subscriber. Delivery is
//! fire-and-forget: each subscriber owns a bounded buffer, `emit` never
//! waits, and a subscriber that falls behind far enough to fill its buffer
//! is dropped and observes a terminal error on its next read. Closing the
//! hub terminates every subscription.
//!
//! Subscribing and unsubscribing take the registry write lock briefly;
//! `emit` only reads it, so slow subscriber churn never stalls emission.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use metrics::counter;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use roster_core::events::Event;

use crate::config::HubConfig;
use crate::metrics::names;

/// Why a subscription terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The subscriber's buffer overflowed and the hub dropped it.
    #[error("subscriber dropped after buffer overflow")]
    Overflowed,
    /// The hub was closed.
    #[error("event hub closed")]
    Closed,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Event>,
    overflowed: Arc<AtomicBool>,
}

/// Multi-subscriber broadcast hub for one event stream.
#[derive(Debug)]
pub struct Hub {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    buffer_capacity: usize,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    /// Creates a hub with the default buffering policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Creates a hub with an explicit buffering policy.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            buffer_capacity: config.buffer_capacity.max(1),
        }
    }

    /// Registers a new subscriber.
    ///
    /// A subscription taken after [`Hub::close`] terminates immediately.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer_capacity);
        let overflowed = Arc::new(AtomicBool::new(false));

        if !self.closed.load(Ordering::SeqCst) {
            let subscriber = Subscriber {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                tx,
                overflowed: Arc::clone(&overflowed),
            };
            self.write_subscribers().push(subscriber);
        }
        // When closed, tx drops here and the subscription reads Closed.

        Subscription { rx, overflowed }
    }

    /// Delivers an event to every current subscriber.
    ///
    /// Never waits: a subscriber whose buffer is full is marked overflowed
    /// and dropped from the registry.
    pub fn emit(&self, event: Event) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut dropped = Vec::new();
        {
            let subscribers = self.read_subscribers();
            counter!(names::HUB_EVENTS_EMITTED).increment(1);

            for subscriber in subscribers.iter() {
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        subscriber.overflowed.store(true, Ordering::SeqCst);
                        dropped.push(subscriber.id);
                        tracing::warn!(
                            subscriber = subscriber.id,
                            kind = event.kind(),
                            "dropping subscriber with full buffer"
                        );
                    }
                    // Receiver already gone; reap the entry.
                    Err(TrySendError::Closed(_)) => dropped.push(subscriber.id),
                }
            }
        }

        if !dropped.is_empty() {
            counter!(names::HUB_SUBSCRIBERS_DROPPED)
                .increment(u64::try_from(dropped.len()).unwrap_or(0));
            self.write_subscribers()
                .retain(|s| !dropped.contains(&s.id));
        }
    }

    /// Closes the hub, terminating every subscription.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.write_subscribers().clear();
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.read_subscribers().len()
    }

    fn read_subscribers(&self) -> std::sync::RwLockReadGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_subscribers(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One subscriber's lazy view of a hub's event stream.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
    overflowed: Arc<AtomicBool>,
}

impl Subscription {
    /// Waits for the next event.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Overflowed`] once the hub has dropped
    /// this subscriber (even if events remain buffered), or
    /// [`SubscriptionError::Closed`] after the hub shuts down.
    pub async fn next(&mut self) -> Result<Event, SubscriptionError> {
        if self.overflowed.load(Ordering::SeqCst) {
            return Err(SubscriptionError::Overflowed);
        }
        match self.rx.recv().await {
            Some(event) => Ok(event),
            None => Err(self.terminal_error()),
        }
    }

    /// Returns the next buffered event without waiting.
    ///
    /// `Ok(None)` means the stream is still live but nothing is buffered.
    ///
    /// # Errors
    ///
    /// Same terminal errors as [`Subscription::next`].
    pub fn try_next(&mut self) -> Result<Option<Event>, SubscriptionError> {
        if self.overflowed.load(Ordering::SeqCst) {
            return Err(SubscriptionError::Overflowed);
        }
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(self.terminal_error()),
        }
    }

    /// Stops receiving events. Subsequent reads observe a terminal error.
    pub fn close(&mut self) {
        self.rx.close();
    }

    fn terminal_error(&self) -> SubscriptionError {
        if self.overflowed.load(Ordering::SeqCst) {
            SubscriptionError::Overflowed
        } else {
            SubscriptionError::Closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use roster_core::actual_lrp::{ActualLrp, ActualLrpKey};
    use roster_core::task::{Task, TaskDefinition};

    fn event(guid: &str) -> Event {
        let since = Utc.timestamp_opt(0, 0).single().expect("valid timestamp");
        Event::InstanceCreated {
            actual_lrp: ActualLrp::unclaimed(ActualLrpKey::new(guid, 0, "domain-1"), since),
        }
    }

    fn task_event(guid: &str) -> Event {
        let now = Utc.timestamp_opt(0, 0).single().expect("valid timestamp");
        Event::TaskCreated {
            task: Task::desire(guid, "domain-1", TaskDefinition::default(), now),
        }
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber() -> Result<(), SubscriptionError> {
        let hub = Hub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.emit(event("process-1"));

        assert_eq!(first.next().await?.kind(), "flattened_actual_lrp_created");
        assert_eq!(second.next().await?.kind(), "flattened_actual_lrp_created");
        Ok(())
    }

    #[tokio::test]
    async fn preserves_emission_order_per_subscriber() -> Result<(), SubscriptionError> {
        let hub = Hub::new();
        let mut sub = hub.subscribe();

        hub.emit(task_event("task-1"));
        hub.emit(task_event("task-2"));

        assert_eq!(sub.next().await?.key(), "task-1");
        assert_eq!(sub.next().await?.key(), "task-2");
        Ok(())
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_dropped_with_terminal_error() {
        let hub = Hub::with_config(HubConfig { buffer_capacity: 2 });
        let mut slow = hub.subscribe();

        hub.emit(event("process-1"));
        hub.emit(event("process-2"));
        hub.emit(event("process-3"));

        // Terminal error fires even though two events are still buffered.
        assert_eq!(slow.next().await, Err(SubscriptionError::Overflowed));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn fast_subscriber_survives_a_slow_peer() -> Result<(), SubscriptionError> {
        let hub = Hub::with_config(HubConfig { buffer_capacity: 1 });
        let mut fast = hub.subscribe();
        let mut slow = hub.subscribe();

        hub.emit(event("process-1"));
        assert_eq!(fast.next().await?.kind(), "flattened_actual_lrp_created");

        hub.emit(event("process-2"));
        assert_eq!(fast.next().await?.kind(), "flattened_actual_lrp_created");
        assert_eq!(slow.next().await, Err(SubscriptionError::Overflowed));
        assert_eq!(hub.subscriber_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn close_terminates_all_subscriptions() {
        let hub = Hub::new();
        let mut sub = hub.subscribe();

        hub.close();
        assert_eq!(sub.next().await, Err(SubscriptionError::Closed));

        let mut late = hub.subscribe();
        assert_eq!(late.next().await, Err(SubscriptionError::Closed));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn emit_after_close_is_a_no_op() {
        let hub = Hub::new();
        let mut sub = hub.subscribe();
        hub.close();
        hub.emit(event("process-1"));
        assert_eq!(sub.next().await, Err(SubscriptionError::Closed));
    }

    #[tokio::test]
    async fn closed_subscription_stops_receiving() {
        let hub = Hub::new();
        let mut sub = hub.subscribe();
        sub.close();
        hub.emit(event("process-1"));
        // The buffered event (if any) drains, then the stream terminates.
        loop {
            match sub.try_next() {
                Ok(Some(_)) => {}
                Ok(None) => unreachable!("closed subscription cannot be live-empty"),
                Err(err) => {
                    assert_eq!(err, SubscriptionError::Closed);
                    break;
                }
            }
        }
    }
}
