//! Event relay core.
//!
//! The relay turns store change batches into per-stream deliveries:
//!
//! 1. an empty batch is a no-op
//! 2. events are partitioned by stream name and each partition is sorted by version
//! 3. each partition must be a contiguous version range; a gap or duplicate is a
//!    fatal ordering error for that stream and none of its events are delivered
//! 4. valid partitions go to every accepting [`StreamHandler`]; a handler error
//!    or panic is recorded against the stream and the next partition proceeds
//! 5. recorded errors are logged once the batch is done and returned in the
//!    [`DispatchReport`]; nothing is retried
//!
//! Batches are processed one at a time and to completion. A batch raised while
//! the relay is already dispatching (e.g. a subscriber saving another
//! aggregate) is queued and drained by the active dispatcher before it returns.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, info};

use fleetstream_core::StreamName;

use crate::notifier::{ChangeBatch, ChangeHandler, ChangeNotifier, SubscriptionId};
use crate::{EventEnvelope, StreamHandler};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("stream '{stream}' is not contiguous (expected version {expected}, found {found})")]
    Contiguity {
        stream: StreamName,
        expected: u64,
        found: u64,
    },

    #[error("handler '{handler}' failed on stream '{stream}': {source:#}")]
    Handler {
        handler: String,
        stream: StreamName,
        #[source]
        source: anyhow::Error,
    },

    #[error("handler '{handler}' panicked on stream '{stream}': {message}")]
    HandlerPanicked {
        handler: String,
        stream: StreamName,
        message: String,
    },
}

/// A failure recorded while dispatching one batch.
#[derive(Debug)]
pub struct ProcessingError {
    pub stream: StreamName,
    pub error: RelayError,
}

/// Outcome of dispatching one change batch.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub streams: usize,
    pub events: usize,
    pub errors: Vec<ProcessingError>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Streams with at least one recorded error, without duplicates.
    pub fn failed_streams(&self) -> Vec<&StreamName> {
        let mut streams: Vec<&StreamName> = Vec::new();
        for e in &self.errors {
            if !streams.contains(&&e.stream) {
                streams.push(&e.stream);
            }
        }
        streams
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Dispatching,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Dispatch the partitions of one batch on scoped threads.
    ///
    /// Order within a stream is unaffected; batches stay serialized.
    #[serde(default)]
    pub parallel_partitions: bool,
}

/// Ordered events of one stream taken from a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPartition {
    pub stream: StreamName,
    pub aggregate_type: String,
    pub events: Vec<EventEnvelope<JsonValue>>,
}

/// Group events by stream (first-appearance order) and sort each group by version.
pub fn partition(events: &[EventEnvelope<JsonValue>]) -> Vec<StreamPartition> {
    let mut index: HashMap<&StreamName, usize> = HashMap::new();
    let mut partitions: Vec<StreamPartition> = Vec::new();

    for e in events {
        let slot = *index.entry(e.stream_name()).or_insert_with(|| {
            partitions.push(StreamPartition {
                stream: e.stream_name().clone(),
                aggregate_type: e.aggregate_type().to_string(),
                events: Vec::new(),
            });
            partitions.len() - 1
        });
        partitions[slot].events.push(e.clone());
    }

    for p in &mut partitions {
        p.events.sort_by_key(|e| e.version());
    }
    partitions
}

/// Check that sorted `events` cover `{first, first + 1, …}` with no gaps or duplicates.
pub fn verify_contiguous(
    stream: &StreamName,
    events: &[EventEnvelope<JsonValue>],
) -> Result<(), RelayError> {
    let Some(first) = events.first() else {
        return Ok(());
    };
    if first.version() == 0 {
        return Err(RelayError::Contiguity {
            stream: stream.clone(),
            expected: 1,
            found: 0,
        });
    }

    let start = first.version();
    for (offset, e) in events.iter().enumerate() {
        let expected = start + offset as u64;
        if e.version() != expected {
            return Err(RelayError::Contiguity {
                stream: stream.clone(),
                expected,
                found: e.version(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct DispatchQueue {
    dispatching: bool,
    pending: VecDeque<ChangeBatch>,
}

struct ActiveSubscription {
    notifier: Arc<dyn ChangeNotifier>,
    id: SubscriptionId,
}

/// Delivers change batches to stream handlers with per-stream isolation.
pub struct EventRelay {
    name: String,
    handlers: Vec<Arc<dyn StreamHandler>>,
    config: RelayConfig,
    queue: Mutex<DispatchQueue>,
    subscriptions: Mutex<Vec<ActiveSubscription>>,
}

/// Builder for [`EventRelay`]; handlers are fixed once built.
pub struct EventRelayBuilder {
    name: String,
    handlers: Vec<Arc<dyn StreamHandler>>,
    config: RelayConfig,
}

impl EventRelayBuilder {
    pub fn handler(mut self, handler: Arc<dyn StreamHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Arc<EventRelay> {
        Arc::new(EventRelay {
            name: self.name,
            handlers: self.handlers,
            config: self.config,
            queue: Mutex::new(DispatchQueue::default()),
            subscriptions: Mutex::new(Vec::new()),
        })
    }
}

impl EventRelay {
    pub fn builder(name: impl Into<String>) -> EventRelayBuilder {
        EventRelayBuilder {
            name: name.into(),
            handlers: Vec::new(),
            config: RelayConfig::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RelayState {
        if self.lock_queue().dispatching {
            RelayState::Dispatching
        } else {
            RelayState::Idle
        }
    }

    /// Subscribe to a store's notifier. Starting twice on the same notifier is a no-op.
    ///
    /// Returns `true` when a new subscription was made.
    pub fn start(self: &Arc<Self>, notifier: Arc<dyn ChangeNotifier>) -> bool {
        let mut subs = self.lock_subscriptions();
        if subs.iter().any(|s| same_notifier(&s.notifier, &notifier)) {
            return false;
        }

        let listener = Arc::new(RelayListener {
            relay: Arc::downgrade(self),
        });
        let id = notifier.subscribe(listener);
        subs.push(ActiveSubscription { notifier, id });
        info!(relay = %self.name, subscriptions = subs.len(), "relay started");
        true
    }

    /// Unsubscribe from every notifier. Safe to call repeatedly.
    pub fn stop(&self) {
        let subs: Vec<ActiveSubscription> = self.lock_subscriptions().drain(..).collect();
        if subs.is_empty() {
            return;
        }
        for s in &subs {
            s.notifier.unsubscribe(s.id);
        }
        info!(relay = %self.name, subscriptions = subs.len(), "relay stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.lock_subscriptions().is_empty()
    }

    /// Queue `batch` and, unless another call is already dispatching, drain the
    /// queue on this thread.
    ///
    /// When this returns on the draining thread, `batch` and everything queued
    /// behind it has been processed. A call that finds the relay already
    /// dispatching returns as soon as its batch is queued; the store serializes
    /// writers across append and notify, so that only happens for appends made
    /// from inside a handler or for a relay fed by more than one notifier.
    pub fn dispatch(&self, batch: ChangeBatch) {
        {
            let mut queue = self.lock_queue();
            queue.pending.push_back(batch);
            if queue.dispatching {
                return;
            }
            queue.dispatching = true;
        }

        let mut draining = DrainGuard {
            relay: self,
            finished: false,
        };
        loop {
            let next = {
                let mut queue = self.lock_queue();
                match queue.pending.pop_front() {
                    Some(b) => b,
                    None => {
                        queue.dispatching = false;
                        draining.finished = true;
                        return;
                    }
                }
            };
            self.process_batch(&next);
        }
    }

    /// Process one batch to completion and report what failed.
    ///
    /// This bypasses the dispatch queue; use [`dispatch`](Self::dispatch) for
    /// notifier-driven delivery.
    pub fn process_batch(&self, batch: &ChangeBatch) -> DispatchReport {
        if batch.is_empty() {
            return DispatchReport::default();
        }

        let partitions = partition(batch.events());
        let mut report = DispatchReport {
            streams: partitions.len(),
            events: batch.len(),
            errors: Vec::new(),
        };

        if self.config.parallel_partitions && partitions.len() > 1 {
            let results: Vec<Vec<ProcessingError>> = thread::scope(|scope| {
                let handles: Vec<_> = partitions
                    .iter()
                    .map(|p| scope.spawn(move || self.dispatch_partition(p)))
                    .collect();
                handles
                    .into_iter()
                    .zip(&partitions)
                    .map(|(h, p)| {
                        h.join().unwrap_or_else(|payload| {
                            vec![ProcessingError {
                                stream: p.stream.clone(),
                                error: RelayError::HandlerPanicked {
                                    handler: self.name.clone(),
                                    stream: p.stream.clone(),
                                    message: panic_message(payload.as_ref()),
                                },
                            }]
                        })
                    })
                    .collect()
            });
            report.errors.extend(results.into_iter().flatten());
        } else {
            for p in &partitions {
                report.errors.extend(self.dispatch_partition(p));
            }
        }

        for e in &report.errors {
            error!(relay = %self.name, stream = %e.stream, error = %e.error, "stream processing failed");
        }
        report
    }

    fn dispatch_partition(&self, partition: &StreamPartition) -> Vec<ProcessingError> {
        let stream = &partition.stream;
        if let Err(error) = verify_contiguous(stream, &partition.events) {
            return vec![ProcessingError {
                stream: stream.clone(),
                error,
            }];
        }

        let mut errors = Vec::new();
        for handler in &self.handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                if !handler.accepts(&partition.aggregate_type) {
                    return Ok(());
                }
                debug!(
                    relay = %self.name,
                    handler = handler.name(),
                    stream = %stream,
                    events = partition.events.len(),
                    "dispatching stream"
                );
                handler.write_event_stream(stream, &partition.events)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(source)) => errors.push(ProcessingError {
                    stream: stream.clone(),
                    error: RelayError::Handler {
                        handler: handler.name().to_string(),
                        stream: stream.clone(),
                        source,
                    },
                }),
                Err(payload) => errors.push(ProcessingError {
                    stream: stream.clone(),
                    error: RelayError::HandlerPanicked {
                        handler: handler.name().to_string(),
                        stream: stream.clone(),
                        message: panic_message(payload.as_ref()),
                    },
                }),
            }
        }
        errors
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, DispatchQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<ActiveSubscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the relay to idle if draining unwinds; queued batches stay queued
/// for the next dispatch.
struct DrainGuard<'a> {
    relay: &'a EventRelay,
    finished: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut queue = self.relay.lock_queue();
        queue.dispatching = false;
        error!(
            relay = %self.relay.name,
            pending = queue.pending.len(),
            "dispatch aborted by a panic; relay reset to idle"
        );
    }
}

impl core::fmt::Debug for EventRelay {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let handlers: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("EventRelay")
            .field("name", &self.name)
            .field("handlers", &handlers)
            .field("config", &self.config)
            .finish()
    }
}

impl ChangeHandler for EventRelay {
    fn on_change(&self, batch: &ChangeBatch) {
        self.dispatch(batch.clone());
    }
}

/// Subscription held by a notifier; does not keep the relay alive.
struct RelayListener {
    relay: Weak<EventRelay>,
}

impl ChangeHandler for RelayListener {
    fn on_change(&self, batch: &ChangeBatch) {
        if let Some(relay) = self.relay.upgrade() {
            relay.dispatch(batch.clone());
        }
    }
}

fn same_notifier(a: &Arc<dyn ChangeNotifier>, b: &Arc<dyn ChangeNotifier>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::InMemoryChangeNotifier;
    use chrono::Utc;
    use fleetstream_core::AggregateId;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn envelope(kind: &str, id: &str, version: u64) -> EventEnvelope<JsonValue> {
        let aggregate_id = AggregateId::parse(id).unwrap();
        EventEnvelope::new(
            Uuid::now_v7(),
            StreamName::for_aggregate(kind, &aggregate_id),
            aggregate_id,
            kind,
            version,
            format!("{kind}.happened"),
            1,
            Utc::now(),
            serde_json::json!({ "v": version }),
        )
    }

    /// Records (stream, versions) per call; fails on configured streams.
    #[derive(Default)]
    struct RecordingHandler {
        name: String,
        calls: Mutex<Vec<(String, Vec<u64>)>>,
        fail_on: Vec<String>,
        panic_on: Vec<String>,
        only: Option<String>,
    }

    impl RecordingHandler {
        fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, Vec<u64>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl StreamHandler for RecordingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn accepts(&self, aggregate_type: &str) -> bool {
            self.only.as_deref().is_none_or(|t| t == aggregate_type)
        }

        fn write_event_stream(
            &self,
            stream: &StreamName,
            events: &[EventEnvelope<JsonValue>],
        ) -> anyhow::Result<()> {
            if self.panic_on.iter().any(|s| s == stream.as_str()) {
                panic!("boom on {stream}");
            }
            if self.fail_on.iter().any(|s| s == stream.as_str()) {
                anyhow::bail!("projection store unavailable");
            }
            self.calls.lock().unwrap().push((
                stream.as_str().to_string(),
                events.iter().map(|e| e.version()).collect(),
            ));
            Ok(())
        }
    }

    fn relay_with(handler: Arc<RecordingHandler>) -> Arc<EventRelay> {
        EventRelay::builder("test").handler(handler).build()
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let handler = Arc::new(RecordingHandler::named("h"));
        let relay = relay_with(handler.clone());
        let report = relay.process_batch(&ChangeBatch::default());
        assert_eq!(report.streams, 0);
        assert!(report.is_clean());
        assert!(handler.calls().is_empty());
    }

    #[test]
    fn partitions_are_sorted_and_delivered_per_stream() {
        let handler = Arc::new(RecordingHandler::named("h"));
        let relay = relay_with(handler.clone());

        let batch = ChangeBatch::new(vec![
            envelope("fleet.car", "car-1", 2),
            envelope("fleet.car", "car-2", 1),
            envelope("fleet.car", "car-1", 1),
            envelope("fleet.car", "car-1", 3),
        ]);
        let report = relay.process_batch(&batch);

        assert!(report.is_clean());
        assert_eq!(report.streams, 2);
        assert_eq!(
            handler.calls(),
            vec![
                ("fleet.car-car-1".to_string(), vec![1, 2, 3]),
                ("fleet.car-car-2".to_string(), vec![1]),
            ]
        );
    }

    #[test]
    fn gap_is_a_contiguity_error_and_stream_is_not_delivered() {
        let handler = Arc::new(RecordingHandler::named("h"));
        let relay = relay_with(handler.clone());

        let batch = ChangeBatch::new(vec![
            envelope("fleet.car", "car-1", 1),
            envelope("fleet.car", "car-1", 3),
            envelope("fleet.car", "car-2", 4),
        ]);
        let report = relay.process_batch(&batch);

        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            report.errors[0].error,
            RelayError::Contiguity { expected: 2, found: 3, .. }
        ));
        assert_eq!(report.errors[0].stream.as_str(), "fleet.car-car-1");
        assert_eq!(handler.calls(), vec![("fleet.car-car-2".to_string(), vec![4])]);
    }

    #[test]
    fn duplicate_version_is_a_contiguity_error() {
        let stream = StreamName::new("fleet.car-car-1");
        let events = vec![
            envelope("fleet.car", "car-1", 1),
            envelope("fleet.car", "car-1", 1),
        ];
        assert!(matches!(
            verify_contiguous(&stream, &events),
            Err(RelayError::Contiguity { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn version_zero_is_rejected() {
        let stream = StreamName::new("fleet.car-car-1");
        let events = vec![envelope("fleet.car", "car-1", 0)];
        assert!(verify_contiguous(&stream, &events).is_err());
    }

    #[test]
    fn handler_failure_is_isolated_to_its_stream() {
        let handler = Arc::new(RecordingHandler {
            fail_on: vec!["fleet.car-car-1".to_string()],
            ..RecordingHandler::named("h")
        });
        let relay = relay_with(handler.clone());

        let report = relay.process_batch(&ChangeBatch::new(vec![
            envelope("fleet.car", "car-1", 1),
            envelope("fleet.car", "car-2", 1),
        ]));

        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0].error, RelayError::Handler { .. }));
        assert_eq!(handler.calls(), vec![("fleet.car-car-2".to_string(), vec![1])]);
    }

    #[test]
    fn handler_panic_is_caught_and_recorded() {
        let handler = Arc::new(RecordingHandler {
            panic_on: vec!["fleet.car-car-1".to_string()],
            ..RecordingHandler::named("h")
        });
        let relay = relay_with(handler.clone());

        let report = relay.process_batch(&ChangeBatch::new(vec![
            envelope("fleet.car", "car-1", 1),
            envelope("fleet.car", "car-2", 1),
        ]));

        assert_eq!(report.failed_streams().len(), 1);
        match &report.errors[0].error {
            RelayError::HandlerPanicked { message, .. } => assert!(message.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(handler.calls().len(), 1);
    }

    #[test]
    fn handlers_only_receive_accepted_aggregate_types() {
        let cars = Arc::new(RecordingHandler {
            only: Some("fleet.car".to_string()),
            ..RecordingHandler::named("cars")
        });
        let everything = Arc::new(RecordingHandler::named("all"));
        let relay = EventRelay::builder("test")
            .handler(cars.clone())
            .handler(everything.clone())
            .build();

        relay.process_batch(&ChangeBatch::new(vec![
            envelope("fleet.car", "car-1", 1),
            envelope("fleet.driver", "d-1", 1),
        ]));

        assert_eq!(cars.calls().len(), 1);
        assert_eq!(everything.calls().len(), 2);
    }

    #[test]
    fn parallel_dispatch_keeps_per_stream_order() {
        let handler = Arc::new(RecordingHandler::named("h"));
        let relay = EventRelay::builder("parallel")
            .handler(handler.clone())
            .config(RelayConfig {
                parallel_partitions: true,
            })
            .build();

        let mut events = Vec::new();
        for v in (1..=5).rev() {
            events.push(envelope("fleet.car", "car-1", v));
            events.push(envelope("fleet.car", "car-2", v));
        }
        let report = relay.process_batch(&ChangeBatch::new(events));

        assert!(report.is_clean());
        let mut calls = handler.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("fleet.car-car-1".to_string(), vec![1, 2, 3, 4, 5]),
                ("fleet.car-car-2".to_string(), vec![1, 2, 3, 4, 5]),
            ]
        );
    }

    #[test]
    fn start_is_idempotent_and_stop_unsubscribes() {
        let handler = Arc::new(RecordingHandler::named("h"));
        let relay = relay_with(handler.clone());
        let notifier: Arc<dyn ChangeNotifier> = Arc::new(InMemoryChangeNotifier::new());

        assert!(relay.start(notifier.clone()));
        assert!(!relay.start(notifier.clone()));
        assert_eq!(notifier.subscriber_count(), 1);
        assert!(relay.is_running());

        notifier.notify(&ChangeBatch::new(vec![envelope("fleet.car", "car-1", 1)]));
        assert_eq!(handler.calls().len(), 1);
        assert_eq!(relay.state(), RelayState::Idle);

        relay.stop();
        relay.stop();
        assert!(!relay.is_running());
        assert_eq!(notifier.subscriber_count(), 0);

        notifier.notify(&ChangeBatch::new(vec![envelope("fleet.car", "car-1", 2)]));
        assert_eq!(handler.calls().len(), 1);
    }

    /// Raises a second batch from inside the first one's dispatch.
    struct ReentrantHandler {
        notifier: Arc<InMemoryChangeNotifier>,
        seen: Mutex<Vec<u64>>,
    }

    impl StreamHandler for ReentrantHandler {
        fn name(&self) -> &str {
            "reentrant"
        }

        fn write_event_stream(
            &self,
            _stream: &StreamName,
            events: &[EventEnvelope<JsonValue>],
        ) -> anyhow::Result<()> {
            for e in events {
                self.seen.lock().unwrap().push(e.version());
                if e.version() == 1 {
                    self.notifier
                        .notify(&ChangeBatch::new(vec![envelope("fleet.car", "car-1", 2)]));
                    // Still queued: the current batch has not finished.
                    assert_eq!(*self.seen.lock().unwrap(), vec![1]);
                }
            }
            Ok(())
        }
    }

    #[test]
    fn reentrant_batch_is_delivered_after_the_current_one() {
        let notifier = Arc::new(InMemoryChangeNotifier::new());
        let handler = Arc::new(ReentrantHandler {
            notifier: notifier.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let relay = EventRelay::builder("reentrant").handler(handler.clone()).build();
        relay.start(notifier.clone());

        notifier.notify(&ChangeBatch::new(vec![envelope("fleet.car", "car-1", 1)]));

        assert_eq!(*handler.seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(relay.state(), RelayState::Idle);
    }

    #[test]
    fn dropped_relay_ignores_notifications() {
        let handler = Arc::new(RecordingHandler::named("h"));
        let notifier: Arc<dyn ChangeNotifier> = Arc::new(InMemoryChangeNotifier::new());
        {
            let relay = relay_with(handler.clone());
            relay.start(notifier.clone());
        }
        notifier.notify(&ChangeBatch::new(vec![envelope("fleet.car", "car-1", 1)]));
        assert!(handler.calls().is_empty());
    }

    /// Panics in `accepts` for driver streams.
    struct PickyHandler;

    impl StreamHandler for PickyHandler {
        fn name(&self) -> &str {
            "picky"
        }

        fn accepts(&self, aggregate_type: &str) -> bool {
            assert_ne!(aggregate_type, "fleet.driver", "drivers are not supported");
            true
        }

        fn write_event_stream(&self, _stream: &StreamName, _events: &[EventEnvelope<JsonValue>]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn panic_in_accepts_is_isolated_to_the_stream() {
        let recorder = Arc::new(RecordingHandler::named("h"));
        let relay = EventRelay::builder("test")
            .handler(Arc::new(PickyHandler))
            .handler(recorder.clone())
            .build();

        relay.dispatch(ChangeBatch::new(vec![envelope("fleet.driver", "d-1", 1)]));
        relay.dispatch(ChangeBatch::new(vec![envelope("fleet.car", "car-1", 1)]));

        assert_eq!(relay.state(), RelayState::Idle);
        assert_eq!(
            recorder.calls(),
            vec![
                ("fleet.driver-d-1".to_string(), vec![1]),
                ("fleet.car-car-1".to_string(), vec![1]),
            ]
        );

        let report = relay.process_batch(&ChangeBatch::new(vec![envelope("fleet.driver", "d-2", 1)]));
        assert!(matches!(
            report.errors[0].error,
            RelayError::HandlerPanicked { ref handler, .. } if handler == "picky"
        ));
    }

    /// Fails every stream; while `armed` its name panics, so building the
    /// failure report unwinds out of the relay.
    struct UnnamedFailure {
        armed: std::sync::atomic::AtomicBool,
    }

    impl StreamHandler for UnnamedFailure {
        fn name(&self) -> &str {
            if self.armed.load(std::sync::atomic::Ordering::SeqCst) {
                panic!("name unavailable");
            }
            "unnamed"
        }

        fn write_event_stream(&self, _stream: &StreamName, _events: &[EventEnvelope<JsonValue>]) -> anyhow::Result<()> {
            anyhow::bail!("always fails")
        }
    }

    #[test]
    fn relay_returns_to_idle_after_dispatch_unwinds() {
        let failing = Arc::new(UnnamedFailure {
            armed: std::sync::atomic::AtomicBool::new(true),
        });
        let recorder = Arc::new(RecordingHandler::named("h"));
        let relay = EventRelay::builder("test")
            .handler(failing.clone())
            .handler(recorder.clone())
            .build();

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            relay.dispatch(ChangeBatch::new(vec![envelope("fleet.car", "car-1", 1)]));
        }));
        assert!(unwound.is_err());
        assert_eq!(relay.state(), RelayState::Idle);

        failing.armed.store(false, std::sync::atomic::Ordering::SeqCst);
        relay.dispatch(ChangeBatch::new(vec![envelope("fleet.car", "car-2", 1)]));
        assert_eq!(recorder.calls(), vec![("fleet.car-car-2".to_string(), vec![1])]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: partitioning never mixes streams and yields each stream's
        /// versions in ascending order.
        #[test]
        fn partitions_never_interleave_streams(
            picks in prop::collection::vec(0usize..4, 0..40)
        ) {
            let mut next = [0u64; 4];
            let mut events = Vec::new();
            for p in picks {
                next[p] += 1;
                events.push(envelope("fleet.car", &format!("car-{}", p), next[p]));
            }
            events.reverse();

            let partitions = partition(&events);
            let total: usize = partitions.iter().map(|p| p.events.len()).sum();
            prop_assert_eq!(total, events.len());

            for p in &partitions {
                prop_assert!(p.events.iter().all(|e| e.stream_name() == &p.stream));
                let versions: Vec<u64> = p.events.iter().map(|e| e.version()).collect();
                let expected: Vec<u64> = (1..=versions.len() as u64).collect();
                prop_assert_eq!(versions, expected);
                prop_assert!(verify_contiguous(&p.stream, &p.events).is_ok());
            }
        }

        /// Property: removing any interior version from a contiguous run is detected.
        #[test]
        fn any_gap_is_detected(len in 3u64..20, hole in 1u64..19) {
            prop_assume!(hole < len - 1);
            let events: Vec<_> = (1..=len)
                .filter(|v| *v != hole + 1)
                .map(|v| envelope("fleet.car", "car-1", v))
                .collect();
            let stream = StreamName::new("fleet.car-car-1");
            let is_contiguity_error = matches!(
                verify_contiguous(&stream, &events),
                Err(RelayError::Contiguity { .. })
            );
            prop_assert!(is_contiguity_error);
        }
    }
}
