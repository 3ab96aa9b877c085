use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use fleetstream_core::StreamName;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend};

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<BTreeMap<StreamName, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.version).unwrap_or(0)
    }
}

/// Checks that need no stream state: one aggregate per stream, matching name.
fn validate_append(append: &StreamAppend) -> Result<(), EventStoreError> {
    let first = &append.events[0];
    let expected_name =
        StreamName::for_aggregate(&first.aggregate_type, &first.aggregate_id);
    if expected_name != append.stream {
        return Err(EventStoreError::InvalidAppend(format!(
            "events for '{expected_name}' cannot be appended to '{}'",
            append.stream
        )));
    }

    for (idx, e) in append.events.iter().enumerate() {
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch for '{}' contains multiple aggregate_ids (index {idx})",
                append.stream
            )));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch for '{}' contains multiple aggregate_types (index {idx})",
                append.stream
            )));
        }
    }
    Ok(())
}

impl EventStore for InMemoryEventStore {
    fn append_streams(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let appends: Vec<StreamAppend> = appends
            .into_iter()
            .filter(|a| !a.events.is_empty())
            .collect();
        if appends.is_empty() {
            return Ok(vec![]);
        }

        let mut seen = HashSet::new();
        for a in &appends {
            if !seen.insert(&a.stream) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream '{}' appears twice in one append",
                    a.stream
                )));
            }
            validate_append(a)?;
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Poisoned)?;

        // Check every stream before writing any of them.
        for a in &appends {
            let stream = streams.get(&a.stream).map(Vec::as_slice).unwrap_or(&[]);
            let current = Self::current_version(stream);
            if !a.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency {
                    stream: a.stream.clone(),
                    expected: a.expected_version,
                    actual: current,
                });
            }

            // Enforce aggregate type stability across the stream.
            if let Some(existing) = stream.first() {
                if existing.aggregate_type != a.events[0].aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream '{}' holds '{}', attempted append with '{}'",
                        a.stream, existing.aggregate_type, a.events[0].aggregate_type
                    )));
                }
            }
        }

        let mut committed = Vec::new();
        for a in appends {
            let stream = streams.entry(a.stream.clone()).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in a.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    stream_name: a.stream.clone(),
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    version: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, stream: &StreamName) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| EventStoreError::Poisoned)?;
        Ok(streams.get(stream).cloned().unwrap_or_default())
    }

    fn stream_names(&self) -> Result<Vec<StreamName>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| EventStoreError::Poisoned)?;
        Ok(streams.keys().cloned().collect())
    }

    fn destroy_stream(&self, stream: &StreamName) -> Result<bool, EventStoreError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Poisoned)?;
        Ok(streams.remove(stream).is_some())
    }

    fn stream_version(&self, stream: &StreamName) -> Result<u64, EventStoreError> {
        let streams = self.streams.read().map_err(|_| EventStoreError::Poisoned)?;
        Ok(streams
            .get(stream)
            .map(|s| Self::current_version(s))
            .unwrap_or(0))
    }
}
