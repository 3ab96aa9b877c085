//! Append-only event stream store boundary.
//!
//! This module defines an infrastructure-facing abstraction for storing and
//! loading per-aggregate event streams without making any storage assumptions.

pub mod in_memory;
pub mod r#trait;

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use tracing::debug;

use fleetstream_core::StreamName;
use fleetstream_events::{ChangeBatch, ChangeHandler, ChangeNotifier, InMemoryChangeNotifier, SubscriptionId};

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

/// Adapter that raises a change batch after every successful append.
///
/// This ensures the ordering invariant: **notification happens only after the
/// append succeeded**, and a failed append notifies nobody. The batch holds
/// exactly the events just persisted, across every stream of the append.
///
/// Append and notify run as one step per store: a second writer waits until
/// the first writer's batch has been delivered, so subscribers see batches in
/// commit order. A handler may append to the same store from the notifying
/// thread (the nested batch is queued by the relay); appending from another
/// thread while a notification is in flight blocks until it finishes, so
/// parallel-partition relays must not write back into the store that feeds
/// them.
pub struct NotifyingEventStore<S> {
    store: S,
    notifier: Arc<dyn ChangeNotifier>,
    gate: CommitGate,
}

/// Re-entrant per-store lock held across append and notify.
#[derive(Debug, Default)]
struct CommitGate {
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

impl CommitGate {
    fn enter(&self) -> CommitGuard<'_> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match owner.as_mut() {
                None => {
                    *owner = Some((me, 1));
                    break;
                }
                Some((holder, depth)) if *holder == me => {
                    *depth += 1;
                    break;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        CommitGuard { gate: self }
    }
}

/// Released on drop, including while a handler panic unwinds.
struct CommitGuard<'a> {
    gate: &'a CommitGate,
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        let mut owner = self.gate.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, depth)) = owner.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                *owner = None;
                self.gate.released.notify_one();
            }
        }
    }
}

impl<S> NotifyingEventStore<S> {
    /// Wrap `store` with its own in-process notifier.
    pub fn new(store: S) -> Self {
        Self::with_notifier(store, Arc::new(InMemoryChangeNotifier::new()))
    }

    pub fn with_notifier(store: S, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            store,
            notifier,
            gate: CommitGate::default(),
        }
    }

    /// The notifier relays subscribe to (always the same instance).
    pub fn notifier(&self) -> Arc<dyn ChangeNotifier> {
        self.notifier.clone()
    }

    pub fn inner(&self) -> &S {
        &self.store
    }
}

impl<S> core::fmt::Debug for NotifyingEventStore<S>
where
    S: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotifyingEventStore")
            .field("store", &self.store)
            .field("subscribers", &self.notifier.subscriber_count())
            .finish()
    }
}

impl<S> EventStore for NotifyingEventStore<S>
where
    S: EventStore,
{
    fn append_streams(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let _commit = self.gate.enter();

        // 1) Append (durable step)
        let committed = self.store.append_streams(appends)?;

        // 2) Notify with exactly the committed events
        if !committed.is_empty() {
            let batch = ChangeBatch::new(committed.iter().map(StoredEvent::to_envelope).collect());
            debug!(events = batch.len(), streams = batch.stream_names().len(), "notifying change batch");
            self.notifier.notify(&batch);
        }

        Ok(committed)
    }

    fn load_stream(&self, stream: &StreamName) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load_stream(stream)
    }

    fn stream_names(&self) -> Result<Vec<StreamName>, EventStoreError> {
        self.store.stream_names()
    }

    /// Administrative removal; raises no notification.
    fn destroy_stream(&self, stream: &StreamName) -> Result<bool, EventStoreError> {
        self.store.destroy_stream(stream)
    }

    fn stream_version(&self, stream: &StreamName) -> Result<u64, EventStoreError> {
        self.store.stream_version(stream)
    }
}

impl<S> ChangeNotifier for NotifyingEventStore<S>
where
    S: Send + Sync,
{
    fn subscribe(&self, handler: Arc<dyn ChangeHandler>) -> SubscriptionId {
        self.notifier.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    fn notify(&self, batch: &ChangeBatch) {
        self.notifier.notify(batch)
    }

    fn subscriber_count(&self) -> usize {
        self.notifier.subscriber_count()
    }
}
