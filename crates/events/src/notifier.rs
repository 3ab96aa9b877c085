//! Stream change notification (mechanics only).
//!
//! Every successful append raises exactly one [`ChangeBatch`] containing the
//! events just persisted, possibly spanning several streams. Handlers are
//! registered explicitly on the store's [`ChangeNotifier`] and receive the
//! batch synchronously, in the append's call stack.
//!
//! ```text
//! Save → Event Store (append) → ChangeNotifier::notify(batch) → ChangeHandler(s)
//!                                                                  ├─ EventRelay
//!                                                                  └─ ChannelForwarder → RelayWorker
//! ```
//!
//! Notification always happens **after** the append is durable; if a handler
//! fails, the events are still in the store and can be re-driven.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::warn;

use fleetstream_core::StreamName;

use crate::EventEnvelope;

/// Events appended by one storage mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    events: Vec<EventEnvelope<JsonValue>>,
}

impl ChangeBatch {
    pub fn new(events: Vec<EventEnvelope<JsonValue>>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[EventEnvelope<JsonValue>] {
        &self.events
    }

    pub fn into_events(self) -> Vec<EventEnvelope<JsonValue>> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct stream names, in order of first appearance.
    pub fn stream_names(&self) -> Vec<StreamName> {
        let mut names: Vec<StreamName> = Vec::new();
        for e in &self.events {
            if !names.contains(e.stream_name()) {
                names.push(e.stream_name().clone());
            }
        }
        names
    }
}

impl From<Vec<EventEnvelope<JsonValue>>> for ChangeBatch {
    fn from(events: Vec<EventEnvelope<JsonValue>>) -> Self {
        Self::new(events)
    }
}

impl<'a> IntoIterator for &'a ChangeBatch {
    type Item = &'a EventEnvelope<JsonValue>;
    type IntoIter = std::slice::Iter<'a, EventEnvelope<JsonValue>>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Receives change batches from a notifier.
pub trait ChangeHandler: Send + Sync {
    fn on_change(&self, batch: &ChangeBatch);
}

impl<H> ChangeHandler for Arc<H>
where
    H: ChangeHandler + ?Sized,
{
    fn on_change(&self, batch: &ChangeBatch) {
        (**self).on_change(batch)
    }
}

/// Handle returned by [`ChangeNotifier::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Store-side subscription point for change batches.
///
/// The trait requires `Send + Sync`; handlers may subscribe and unsubscribe
/// from any thread, including from inside `on_change`.
pub trait ChangeNotifier: Send + Sync {
    fn subscribe(&self, handler: Arc<dyn ChangeHandler>) -> SubscriptionId;

    /// Returns `false` if the subscription was unknown (already removed).
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Deliver a batch to every current subscriber, in subscription order.
    fn notify(&self, batch: &ChangeBatch);

    fn subscriber_count(&self) -> usize;
}

impl<N> ChangeNotifier for Arc<N>
where
    N: ChangeNotifier + ?Sized,
{
    fn subscribe(&self, handler: Arc<dyn ChangeHandler>) -> SubscriptionId {
        (**self).subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        (**self).unsubscribe(id)
    }

    fn notify(&self, batch: &ChangeBatch) {
        (**self).notify(batch)
    }

    fn subscriber_count(&self) -> usize {
        (**self).subscriber_count()
    }
}

/// In-process notifier with synchronous fan-out.
///
/// - No IO / no async
/// - Handlers run on the notifying thread, outside the subscriber lock
#[derive(Default)]
pub struct InMemoryChangeNotifier {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Arc<dyn ChangeHandler>)>>,
}

impl InMemoryChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl core::fmt::Debug for InMemoryChangeNotifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl ChangeNotifier for InMemoryChangeNotifier {
    fn subscribe(&self, handler: Arc<dyn ChangeHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        // The list stays consistent even if a writer panicked; recover it.
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    fn notify(&self, batch: &ChangeBatch) {
        if batch.is_empty() {
            return;
        }

        // Snapshot so handlers can re-enter the notifier.
        let snapshot: Vec<Arc<dyn ChangeHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| h.clone())
            .collect();

        for handler in snapshot {
            handler.on_change(batch);
        }
    }

    fn subscriber_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Change handler that queues batches on a local channel instead of
/// processing them in the append's call stack.
///
/// Pair with a [`BatchReceiver`] drained by a worker (see the infra
/// `RelayWorker`). Batches are received in the order they were notified.
#[derive(Debug)]
pub struct ChannelForwarder {
    sender: Sender<ChangeBatch>,
}

impl ChannelForwarder {
    pub fn channel() -> (ChannelForwarder, BatchReceiver) {
        let (sender, receiver) = mpsc::channel();
        (ChannelForwarder { sender }, BatchReceiver { receiver })
    }
}

impl ChangeHandler for ChannelForwarder {
    fn on_change(&self, batch: &ChangeBatch) {
        if self.sender.send(batch.clone()).is_err() {
            warn!(events = batch.len(), "batch receiver dropped; change batch discarded");
        }
    }
}

/// Receiving end of a [`ChannelForwarder`].
///
/// Designed for single-threaded consumption by one worker.
#[derive(Debug)]
pub struct BatchReceiver {
    receiver: Receiver<ChangeBatch>,
}

impl BatchReceiver {
    /// Block until the next batch is available.
    pub fn recv(&self) -> Result<ChangeBatch, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a batch without blocking.
    pub fn try_recv(&self) -> Result<ChangeBatch, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a batch.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ChangeBatch, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetstream_core::AggregateId;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn envelope(id: &str, version: u64) -> EventEnvelope<JsonValue> {
        let aggregate_id = AggregateId::parse(id).unwrap();
        EventEnvelope::new(
            Uuid::now_v7(),
            StreamName::for_aggregate("test.lamp", &aggregate_id),
            aggregate_id,
            "test.lamp",
            version,
            "test.lamp.toggled",
            1,
            Utc::now(),
            serde_json::json!({}),
        )
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<usize>>,
    }

    impl ChangeHandler for Recorder {
        fn on_change(&self, batch: &ChangeBatch) {
            self.seen.lock().unwrap().push(batch.len());
        }
    }

    #[test]
    fn notify_fans_out_to_all_subscribers() {
        let notifier = InMemoryChangeNotifier::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        notifier.subscribe(a.clone());
        notifier.subscribe(b.clone());

        notifier.notify(&ChangeBatch::new(vec![envelope("lamp-1", 1), envelope("lamp-1", 2)]));

        assert_eq!(*a.seen.lock().unwrap(), vec![2]);
        assert_eq!(*b.seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn unsubscribed_handler_stops_receiving() {
        let notifier = InMemoryChangeNotifier::new();
        let a = Arc::new(Recorder::default());
        let id = notifier.subscribe(a.clone());

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.notify(&ChangeBatch::new(vec![envelope("lamp-1", 1)]));

        assert!(a.seen.lock().unwrap().is_empty());
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn empty_batch_is_not_delivered() {
        let notifier = InMemoryChangeNotifier::new();
        let a = Arc::new(Recorder::default());
        notifier.subscribe(a.clone());
        notifier.notify(&ChangeBatch::default());
        assert!(a.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn channel_forwarder_preserves_order() {
        let (forwarder, receiver) = ChannelForwarder::channel();
        forwarder.on_change(&ChangeBatch::new(vec![envelope("lamp-1", 1)]));
        forwarder.on_change(&ChangeBatch::new(vec![envelope("lamp-1", 2), envelope("lamp-2", 1)]));

        assert_eq!(receiver.try_recv().unwrap().len(), 1);
        assert_eq!(receiver.try_recv().unwrap().len(), 2);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn stream_names_are_distinct_in_first_seen_order() {
        let batch = ChangeBatch::new(vec![
            envelope("lamp-2", 1),
            envelope("lamp-1", 1),
            envelope("lamp-2", 2),
        ]);
        let names: Vec<String> = batch
            .stream_names()
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["test.lamp-lamp-2", "test.lamp-lamp-1"]);
    }
}
