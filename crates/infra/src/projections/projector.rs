//! Checkpointed read-model projector.
//!
//! Wraps a [`Projection`] as a [`StreamHandler`]. For every event of an
//! ordered, contiguous stream:
//!
//! 1. load the stream's checkpoint
//! 2. version ≤ checkpoint → skip (already applied)
//! 3. version ≠ checkpoint + 1 → sequence gap, fail the stream (no checkpoint
//!    counts as 0, so a stream must start at version 1)
//! 4. decode into the projection's event type; unknown kinds are logged and skipped
//! 5. apply, then advance the checkpoint to the event's version
//!
//! Apply happens before the checkpoint write, so a crash in between re-applies
//! the event on re-delivery (at-least-once).

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use fleetstream_core::StreamName;
use fleetstream_events::{DecodeError, Decoded, EventEnvelope, Projection, StreamHandler};

use super::checkpoint_store::{CheckpointError, CheckpointStore};

#[derive(Debug, Error)]
pub enum ProjectorError {
    #[error("projector '{projector}' on '{stream}': expected version {}, found {found}", .checkpoint + 1)]
    SequenceGap {
        projector: String,
        stream: StreamName,
        checkpoint: u64,
        found: u64,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("projector '{projector}' failed to apply version {version} of '{stream}': {source:#}")]
    Apply {
        projector: String,
        stream: StreamName,
        version: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("projector '{projector}' failed to clear its read model: {source:#}")]
    Clear {
        projector: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// What one `project_stream` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionOutcome {
    pub applied: usize,
    pub skipped: usize,
    pub unknown: usize,
}

pub struct ReadModelProjector<P, C> {
    projection: P,
    checkpoints: C,
}

impl<P, C> ReadModelProjector<P, C>
where
    P: Projection,
    C: CheckpointStore,
{
    pub fn new(projection: P, checkpoints: C) -> Self {
        Self {
            projection,
            checkpoints,
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn checkpoints(&self) -> &C {
        &self.checkpoints
    }

    pub fn checkpoint(&self, stream: &StreamName) -> Result<Option<u64>, ProjectorError> {
        Ok(self.checkpoints.load_checkpoint(self.projection.name(), stream)?)
    }

    /// Drop the read model and every checkpoint (rebuild support).
    pub fn reset(&self) -> Result<(), ProjectorError> {
        self.projection
            .clear()
            .map_err(|source| ProjectorError::Clear {
                projector: self.projection.name().to_string(),
                source,
            })?;
        self.checkpoints.clear(self.projection.name())?;
        Ok(())
    }

    pub fn project_stream(
        &self,
        stream: &StreamName,
        events: &[EventEnvelope<JsonValue>],
    ) -> Result<ProjectionOutcome, ProjectorError> {
        let name = self.projection.name();
        let mut outcome = ProjectionOutcome::default();

        for envelope in events {
            let version = envelope.version();
            let checkpoint = self.checkpoints.load_checkpoint(name, stream)?.unwrap_or(0);

            if version <= checkpoint {
                outcome.skipped += 1;
                continue;
            }
            if version != checkpoint + 1 {
                return Err(ProjectorError::SequenceGap {
                    projector: name.to_string(),
                    stream: stream.clone(),
                    checkpoint,
                    found: version,
                });
            }

            match envelope.decode::<P::Ev>()? {
                Decoded::Known(event) => {
                    self.projection
                        .apply(envelope, &event)
                        .map_err(|source| ProjectorError::Apply {
                            projector: name.to_string(),
                            stream: stream.clone(),
                            version,
                            source,
                        })?;
                    outcome.applied += 1;
                }
                Decoded::Unknown { event_type } => {
                    warn!(projector = name, stream = %stream, version, event_type = %event_type, "skipping unknown event kind");
                    outcome.unknown += 1;
                }
            }

            self.checkpoints.save_checkpoint(name, stream, version)?;
        }

        debug!(
            projector = name,
            stream = %stream,
            applied = outcome.applied,
            skipped = outcome.skipped,
            unknown = outcome.unknown,
            "stream projected"
        );
        Ok(outcome)
    }
}

impl<P, C> StreamHandler for ReadModelProjector<P, C>
where
    P: Projection,
    C: CheckpointStore,
{
    fn name(&self) -> &str {
        self.projection.name()
    }

    fn accepts(&self, aggregate_type: &str) -> bool {
        self.projection.handles(aggregate_type)
    }

    fn write_event_stream(
        &self,
        stream: &StreamName,
        events: &[EventEnvelope<JsonValue>],
    ) -> anyhow::Result<()> {
        self.project_stream(stream, events)?;
        Ok(())
    }
}

impl<P, C> core::fmt::Debug for ReadModelProjector<P, C>
where
    P: Projection,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadModelProjector")
            .field("projection", &self.projection.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::checkpoint_store::InMemoryCheckpointStore;
    use chrono::{DateTime, Utc};
    use fleetstream_core::AggregateId;
    use fleetstream_events::{Event, EventKinds};
    use serde::{Deserialize, Serialize};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum MeterEvent {
        Read { value: u64, at: DateTime<Utc> },
    }

    impl Event for MeterEvent {
        fn event_type(&self) -> &'static str {
            "test.meter.read"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            match self {
                MeterEvent::Read { at, .. } => *at,
            }
        }
    }

    impl EventKinds for MeterEvent {
        const EVENT_TYPES: &'static [&'static str] = &["test.meter.read"];
    }

    /// Records applied versions; fails on `fail_at`.
    #[derive(Default)]
    struct Readings {
        applied: Mutex<Vec<u64>>,
        fail_at: Option<u64>,
    }

    impl Projection for Readings {
        type Ev = MeterEvent;

        fn name(&self) -> &str {
            "readings"
        }

        fn handles(&self, aggregate_type: &str) -> bool {
            aggregate_type == "test.meter"
        }

        fn apply(&self, envelope: &EventEnvelope<JsonValue>, _event: &MeterEvent) -> anyhow::Result<()> {
            if self.fail_at == Some(envelope.version()) {
                anyhow::bail!("read model offline");
            }
            self.applied.lock().unwrap().push(envelope.version());
            Ok(())
        }

        fn clear(&self) -> anyhow::Result<()> {
            self.applied.lock().unwrap().clear();
            Ok(())
        }
    }

    fn stream() -> StreamName {
        StreamName::new("test.meter-m-1")
    }

    fn envelope(version: u64, event_type: &str) -> EventEnvelope<JsonValue> {
        let payload = serde_json::to_value(MeterEvent::Read {
            value: version * 10,
            at: Utc::now(),
        })
        .unwrap();
        EventEnvelope::new(
            Uuid::now_v7(),
            stream(),
            AggregateId::parse("m-1").unwrap(),
            "test.meter",
            version,
            event_type,
            1,
            Utc::now(),
            payload,
        )
    }

    fn events(versions: &[u64]) -> Vec<EventEnvelope<JsonValue>> {
        versions.iter().map(|v| envelope(*v, "test.meter.read")).collect()
    }

    fn projector(readings: Readings) -> ReadModelProjector<Readings, Arc<InMemoryCheckpointStore>> {
        ReadModelProjector::new(readings, Arc::new(InMemoryCheckpointStore::new()))
    }

    #[test]
    fn applies_events_past_the_checkpoint() {
        let p = projector(Readings::default());
        p.checkpoints().save_checkpoint("readings", &stream(), 2).unwrap();

        let outcome = p.project_stream(&stream(), &events(&[3, 4, 5])).unwrap();

        assert_eq!(outcome.applied, 3);
        assert_eq!(*p.projection().applied.lock().unwrap(), vec![3, 4, 5]);
        assert_eq!(p.checkpoint(&stream()).unwrap(), Some(5));
    }

    #[test]
    fn already_applied_events_are_skipped() {
        let p = projector(Readings::default());
        p.checkpoints().save_checkpoint("readings", &stream(), 3).unwrap();

        let outcome = p.project_stream(&stream(), &events(&[1, 2, 3])).unwrap();

        assert_eq!(outcome.skipped, 3);
        assert!(p.projection().applied.lock().unwrap().is_empty());
        assert_eq!(p.checkpoint(&stream()).unwrap(), Some(3));
    }

    #[test]
    fn overlapping_redelivery_applies_only_new_events() {
        let p = projector(Readings::default());
        p.project_stream(&stream(), &events(&[1, 2])).unwrap();
        p.project_stream(&stream(), &events(&[1, 2, 3])).unwrap();
        assert_eq!(*p.projection().applied.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn gap_after_checkpoint_fails_the_stream() {
        let p = projector(Readings::default());
        p.checkpoints().save_checkpoint("readings", &stream(), 2).unwrap();

        let err = p.project_stream(&stream(), &events(&[4, 5])).unwrap_err();

        assert!(matches!(
            err,
            ProjectorError::SequenceGap { checkpoint: 2, found: 4, .. }
        ));
        assert!(p.projection().applied.lock().unwrap().is_empty());
    }

    #[test]
    fn first_event_creates_the_checkpoint() {
        let p = projector(Readings::default());
        assert_eq!(p.checkpoint(&stream()).unwrap(), None);

        p.project_stream(&stream(), &events(&[1])).unwrap();

        assert_eq!(p.checkpoint(&stream()).unwrap(), Some(1));
    }

    #[test]
    fn stream_without_checkpoint_must_start_at_version_one() {
        let p = projector(Readings::default());

        let err = p.project_stream(&stream(), &events(&[2, 3])).unwrap_err();

        assert!(matches!(
            err,
            ProjectorError::SequenceGap { checkpoint: 0, found: 2, .. }
        ));
        assert!(p.projection().applied.lock().unwrap().is_empty());
        assert_eq!(p.checkpoint(&stream()).unwrap(), None);

        // The missing head arrives later and the stream catches up in order.
        p.project_stream(&stream(), &events(&[1, 2, 3])).unwrap();
        assert_eq!(*p.projection().applied.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn unknown_event_kind_is_skipped_and_checkpointed() {
        let p = projector(Readings::default());
        let batch = vec![
            envelope(1, "test.meter.read"),
            envelope(2, "test.meter.recalibrated"),
            envelope(3, "test.meter.read"),
        ];

        let outcome = p.project_stream(&stream(), &batch).unwrap();

        assert_eq!(outcome.unknown, 1);
        assert_eq!(*p.projection().applied.lock().unwrap(), vec![1, 3]);
        assert_eq!(p.checkpoint(&stream()).unwrap(), Some(3));
    }

    #[test]
    fn apply_failure_leaves_checkpoint_at_last_success() {
        let p = projector(Readings {
            fail_at: Some(2),
            ..Readings::default()
        });

        let err = p.project_stream(&stream(), &events(&[1, 2, 3])).unwrap_err();

        assert!(matches!(err, ProjectorError::Apply { version: 2, .. }));
        assert_eq!(p.checkpoint(&stream()).unwrap(), Some(1));
    }

    #[test]
    fn reset_clears_read_model_and_checkpoints() {
        let p = projector(Readings::default());
        p.project_stream(&stream(), &events(&[1, 2])).unwrap();

        p.reset().unwrap();

        assert!(p.projection().applied.lock().unwrap().is_empty());
        assert_eq!(p.checkpoint(&stream()).unwrap(), None);
    }

    #[test]
    fn accepts_only_handled_aggregate_types() {
        let p = projector(Readings::default());
        assert!(p.accepts("test.meter"));
        assert!(!p.accepts("fleet.car"));
    }
}
