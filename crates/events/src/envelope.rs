use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use fleetstream_core::{AggregateId, StreamName};

use crate::event::{decode_event, DecodeError, Decoded, EventKinds};

/// Envelope for an appended event, containing its stream metadata.
///
/// This is the unit delivered to relays, projectors and subscribers.
///
/// Notes:
/// - **Append-only**: `version` is contiguous per stream, starting at 1.
/// - `event_type` + `event_version` describe the payload schema.
/// - `payload` is the domain-agnostic event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    stream_name: StreamName,

    aggregate_id: AggregateId,
    aggregate_type: String,

    /// Position in the aggregate stream.
    version: u64,

    event_type: String,
    event_version: u32,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        stream_name: StreamName,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: u64,
        event_type: impl Into<String>,
        event_version: u32,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream_name,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            event_type: event_type.into(),
            event_version,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream_name(&self) -> &StreamName {
        &self.stream_name
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl EventEnvelope<JsonValue> {
    /// Decode the JSON payload into a domain event sum type.
    pub fn decode<K: EventKinds>(&self) -> Result<Decoded<K>, DecodeError> {
        decode_event(&self.event_type, &self.payload)
    }
}
