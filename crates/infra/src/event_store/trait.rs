use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use fleetstream_core::{AggregateId, ExpectedVersion, StreamName};
use fleetstream_events::EventEnvelope;
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a version).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: produced by the aggregate's `handle()`
/// 2. **UncommittedEvent**: serialized payload plus aggregate metadata
/// 3. **StoredEvent**: persisted with its stream version
/// 4. **EventEnvelope**: delivered to the relay in a change batch
///
/// Use [`UncommittedEvent::from_typed`] to build one from a typed domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Serialize a typed domain event, capturing the metadata needed to decode it later.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: fleetstream_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// A persisted event with its assigned stream version.
///
/// Versions are assigned by the store during append and are:
/// - **Contiguous**: each event gets `last + 1`, starting at 1
/// - **Stream-scoped**: one sequence per stream name
/// - **Immutable**: never reassigned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub stream_name: StreamName,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Position in the aggregate stream.
    pub version: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    /// Convert into the envelope delivered in change batches.
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.stream_name.clone(),
            self.aggregate_id.clone(),
            self.aggregate_type.clone(),
            self.version,
            self.event_type.clone(),
            self.event_version,
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// Events destined for one stream within a (possibly multi-stream) append.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamAppend {
    pub stream: StreamName,
    pub events: Vec<UncommittedEvent>,
    pub expected_version: ExpectedVersion,
}

impl StreamAppend {
    pub fn new(
        stream: StreamName,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Self {
        Self {
            stream,
            events,
            expected_version,
        }
    }
}

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed on '{stream}' (expected {expected:?}, actual {actual})")]
    Concurrency {
        stream: StreamName,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event store lock poisoned")]
    Poisoned,
}

/// Append-only, per-aggregate event stream store.
///
/// ## Append Semantics
///
/// `append_streams()`:
/// - Validates every event belongs to its stream (aggregate id and type)
/// - Checks every stream's optimistic concurrency expectation **before** writing anything
/// - Assigns versions starting at `current_version + 1`
/// - Persists all streams atomically (all or nothing)
///
/// Appends with no events are no-ops.
///
/// ## Load Semantics
///
/// `load_stream()` returns the stream in version order, or an empty vector
/// for an unknown stream.
pub trait EventStore: Send + Sync {
    /// Append to one or more streams atomically.
    fn append_streams(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream.
    fn load_stream(&self, stream: &StreamName) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// All stream names, sorted.
    fn stream_names(&self) -> Result<Vec<StreamName>, EventStoreError>;

    /// Remove a whole stream (administrative). Returns whether it existed.
    fn destroy_stream(&self, stream: &StreamName) -> Result<bool, EventStoreError>;

    /// Append to a single stream.
    fn append(
        &self,
        stream: &StreamName,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.append_streams(vec![StreamAppend::new(
            stream.clone(),
            events,
            expected_version,
        )])
    }

    /// Version of the last event in the stream (0 when empty).
    fn stream_version(&self, stream: &StreamName) -> Result<u64, EventStoreError> {
        Ok(self
            .load_stream(stream)?
            .last()
            .map(|e| e.version)
            .unwrap_or(0))
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append_streams(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append_streams(appends)
    }

    fn load_stream(&self, stream: &StreamName) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(stream)
    }

    fn stream_names(&self) -> Result<Vec<StreamName>, EventStoreError> {
        (**self).stream_names()
    }

    fn destroy_stream(&self, stream: &StreamName) -> Result<bool, EventStoreError> {
        (**self).destroy_stream(stream)
    }

    fn append(
        &self,
        stream: &StreamName,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(stream, events, expected_version)
    }

    fn stream_version(&self, stream: &StreamName) -> Result<u64, EventStoreError> {
        (**self).stream_version(stream)
    }
}
