//! Replay tooling: re-drive stored streams through a [`StreamHandler`].
//!
//! Used to rebuild a read model from scratch or to catch a projector up after
//! a failed stream. Each stream is loaded whole and handed over as one
//! ordered, contiguous range, so checkpoints decide what is actually applied.

use thiserror::Error;
use tracing::{info, warn};

use fleetstream_core::StreamName;
use fleetstream_events::{verify_contiguous, EventEnvelope, Projection, StreamHandler};
use serde_json::Value as JsonValue;

use super::checkpoint_store::CheckpointStore;
use super::projector::{ProjectorError, ReadModelProjector};
use crate::event_store::{EventStore, EventStoreError, StoredEvent};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("event store error: {0}")]
    Store(#[from] EventStoreError),

    #[error("projection reset failed: {0}")]
    Reset(#[from] ProjectorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayMode {
    /// Keep checkpoints; only events past them are applied.
    #[default]
    FromCheckpoint,
    /// Clear the read model and its checkpoints, then apply everything.
    Rebuild,
}

/// A stream the handler (or the contiguity check) rejected during replay.
#[derive(Debug)]
pub struct ReplayFailure {
    pub stream: StreamName,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct ReplayReport {
    pub streams: usize,
    pub events: usize,
    pub failures: Vec<ReplayFailure>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Hand every accepted stream in `store` to `handler`, in stream-name order.
///
/// A failing stream is recorded and does not stop the others.
pub fn redrive<S, H>(store: &S, handler: &H) -> Result<ReplayReport, ReplayError>
where
    S: EventStore + ?Sized,
    H: StreamHandler + ?Sized,
{
    let mut report = ReplayReport::default();

    for stream in store.stream_names()? {
        let stored = store.load_stream(&stream)?;
        let Some(first) = stored.first() else {
            continue;
        };
        if !handler.accepts(&first.aggregate_type) {
            continue;
        }

        let events: Vec<EventEnvelope<JsonValue>> = stored.iter().map(StoredEvent::to_envelope).collect();
        report.streams += 1;
        report.events += events.len();

        let result = verify_contiguous(&stream, &events)
            .map_err(anyhow::Error::from)
            .and_then(|()| handler.write_event_stream(&stream, &events));

        if let Err(error) = result {
            warn!(handler = handler.name(), stream = %stream, error = %format!("{error:#}"), "replay failed for stream");
            report.failures.push(ReplayFailure { stream, error });
        }
    }

    info!(
        handler = handler.name(),
        streams = report.streams,
        events = report.events,
        failures = report.failures.len(),
        "replay finished"
    );
    Ok(report)
}

/// Replay `store` through a checkpointed projector.
pub fn replay_projector<S, P, C>(
    store: &S,
    projector: &ReadModelProjector<P, C>,
    mode: ReplayMode,
) -> Result<ReplayReport, ReplayError>
where
    S: EventStore + ?Sized,
    P: Projection,
    C: CheckpointStore,
{
    if mode == ReplayMode::Rebuild {
        info!(projector = projector.projection().name(), "clearing read model for rebuild");
        projector.reset()?;
    }
    redrive(store, projector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{InMemoryEventStore, UncommittedEvent};
    use chrono::Utc;
    use fleetstream_core::{AggregateId, ExpectedVersion};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<(String, Vec<u64>)>>,
        fail_on: Option<&'static str>,
    }

    impl StreamHandler for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn accepts(&self, aggregate_type: &str) -> bool {
            aggregate_type == "fleet.car"
        }

        fn write_event_stream(&self, stream: &StreamName, events: &[EventEnvelope<JsonValue>]) -> anyhow::Result<()> {
            if self.fail_on == Some(stream.as_str()) {
                anyhow::bail!("boom");
            }
            self.seen
                .lock()
                .unwrap()
                .push((stream.as_str().to_string(), events.iter().map(|e| e.version()).collect()));
            Ok(())
        }
    }

    fn seed(store: &InMemoryEventStore, kind: &str, id: &str, count: usize) {
        let aggregate_id = AggregateId::parse(id).unwrap();
        let events = (0..count)
            .map(|_| UncommittedEvent {
                event_id: uuid::Uuid::now_v7(),
                aggregate_id: aggregate_id.clone(),
                aggregate_type: kind.to_string(),
                event_type: format!("{kind}.happened"),
                event_version: 1,
                occurred_at: Utc::now(),
                payload: serde_json::json!({}),
            })
            .collect();
        store
            .append(&StreamName::for_aggregate(kind, &aggregate_id), events, ExpectedVersion::NoStream)
            .unwrap();
    }

    #[test]
    fn redrive_hands_over_accepted_streams_whole() {
        let store = InMemoryEventStore::new();
        seed(&store, "fleet.car", "car-1", 3);
        seed(&store, "fleet.car", "car-2", 1);
        seed(&store, "fleet.driver", "d-1", 2);
        let handler = Collect::default();

        let report = redrive(&store, &handler).unwrap();

        assert!(report.is_clean());
        assert_eq!(report.streams, 2);
        assert_eq!(report.events, 4);
        assert_eq!(
            *handler.seen.lock().unwrap(),
            vec![
                ("fleet.car-car-1".to_string(), vec![1, 2, 3]),
                ("fleet.car-car-2".to_string(), vec![1]),
            ]
        );
    }

    #[test]
    fn failing_stream_does_not_stop_the_rest() {
        let store = InMemoryEventStore::new();
        seed(&store, "fleet.car", "car-1", 1);
        seed(&store, "fleet.car", "car-2", 1);
        let handler = Collect {
            fail_on: Some("fleet.car-car-1"),
            ..Collect::default()
        };

        let report = redrive(&store, &handler).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stream.as_str(), "fleet.car-car-1");
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }
}
