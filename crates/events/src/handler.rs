use std::sync::Arc;

use serde_json::Value as JsonValue;

use fleetstream_core::StreamName;

use crate::EventEnvelope;

/// Consumer of ordered, contiguous event streams (relay-to-handler boundary).
///
/// Implemented by read-model projectors and by the domain-event notification
/// producer. The relay guarantees that `events` all belong to `stream`, are
/// sorted ascending by version and form a gap-free range.
///
/// Errors are type-erased: the relay only records and logs them against the
/// stream, it never inspects or retries them.
pub trait StreamHandler: Send + Sync {
    /// Name used in logs and processing errors.
    fn name(&self) -> &str;

    /// Whether streams of `aggregate_type` should be handed to this handler.
    fn accepts(&self, aggregate_type: &str) -> bool {
        let _ = aggregate_type;
        true
    }

    fn write_event_stream(
        &self,
        stream: &StreamName,
        events: &[EventEnvelope<JsonValue>],
    ) -> anyhow::Result<()>;
}

impl<H> StreamHandler for Arc<H>
where
    H: StreamHandler + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn accepts(&self, aggregate_type: &str) -> bool {
        (**self).accepts(aggregate_type)
    }

    fn write_event_stream(
        &self,
        stream: &StreamName,
        events: &[EventEnvelope<JsonValue>],
    ) -> anyhow::Result<()> {
        (**self).write_event_stream(stream, events)
    }
}
