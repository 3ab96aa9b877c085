//! Domain-event notification producer.
//!
//! Forwards events from one aggregate's stream to a subscriber outside that
//! aggregate (another aggregate, an external service). Each source entity type
//! has exactly one publisher/subscriber pair:
//!
//! ```text
//! EventRelay → NotificationProducer::write_event_stream
//!                ├─ publisher (matched by entity type).publish(event) → PublishedEvent
//!                └─ subscriber.notify(published) → accepted?
//! ```
//!
//! The first event of a stream that cannot be published or is refused stops
//! the rest of that stream; the error goes back to the relay, which isolates
//! it to the stream.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use fleetstream_core::StreamName;

use crate::{EventEnvelope, StreamHandler};

/// An event mapped for delivery across an aggregate boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub source_stream: StreamName,
    pub source_event_id: Uuid,
    pub source_version: u64,
    pub source_type: String,

    /// Published (integration) event type, e.g. "fleet.car.assigned".
    pub event_type: String,
    pub payload: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

impl PublishedEvent {
    /// Carry the source event's identity over to a published event.
    pub fn from_source(
        source: &EventEnvelope<JsonValue>,
        event_type: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            source_stream: source.stream_name().clone(),
            source_event_id: source.event_id(),
            source_version: source.version(),
            source_type: source.event_type().to_string(),
            event_type: event_type.into(),
            payload,
            occurred_at: source.occurred_at(),
        }
    }
}

/// Maps source events of one entity type to published events.
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// Aggregate type whose streams this publisher handles.
    fn entity_type(&self) -> &str;

    /// `None` means the event could not be mapped.
    fn publish(&self, event: &EventEnvelope<JsonValue>) -> Option<PublishedEvent>;
}

/// Receives published events; returns whether the event was accepted.
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    fn notify(&self, event: &PublishedEvent) -> anyhow::Result<bool>;
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("no publisher/subscriber pair for entity type '{entity_type}' (stream '{stream}')")]
    MissingPair {
        entity_type: String,
        stream: StreamName,
    },

    #[error("entity type '{entity_type}' already has a publisher")]
    DuplicatePublisher { entity_type: String },

    #[error("publisher '{publisher}' could not map event {event_id} on stream '{stream}'")]
    Publisher {
        publisher: String,
        stream: StreamName,
        event_id: Uuid,
    },

    #[error("subscriber '{subscriber}' rejected event {event_id} on stream '{stream}'")]
    Subscriber {
        subscriber: String,
        stream: StreamName,
        event_id: Uuid,
    },

    #[error("subscriber '{subscriber}' failed on event {event_id} (stream '{stream}'): {source:#}")]
    SubscriberFailed {
        subscriber: String,
        stream: StreamName,
        event_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

struct Pair {
    publisher: Arc<dyn Publisher>,
    subscriber: Arc<dyn Subscriber>,
}

pub struct NotificationProducerBuilder {
    name: String,
    pairs: Vec<Pair>,
}

impl NotificationProducerBuilder {
    pub fn pair(mut self, publisher: Arc<dyn Publisher>, subscriber: Arc<dyn Subscriber>) -> Self {
        self.pairs.push(Pair {
            publisher,
            subscriber,
        });
        self
    }

    /// Fails if two publishers declare the same entity type.
    pub fn build(self) -> Result<NotificationProducer, NotificationError> {
        let mut pairs: HashMap<String, Pair> = HashMap::new();
        for pair in self.pairs {
            let entity_type = pair.publisher.entity_type().to_string();
            if pairs.contains_key(&entity_type) {
                return Err(NotificationError::DuplicatePublisher { entity_type });
            }
            pairs.insert(entity_type, pair);
        }

        info!(producer = %self.name, pairs = pairs.len(), "notification producer built");
        Ok(NotificationProducer {
            name: self.name,
            pairs,
        })
    }
}

/// Stream handler that runs every event through its entity type's pair.
pub struct NotificationProducer {
    name: String,
    pairs: HashMap<String, Pair>,
}

impl NotificationProducer {
    pub fn builder(name: impl Into<String>) -> NotificationProducerBuilder {
        NotificationProducerBuilder {
            name: name.into(),
            pairs: Vec::new(),
        }
    }

    /// Entity types with a registered pair, sorted.
    pub fn entity_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.pairs.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    fn deliver(
        &self,
        stream: &StreamName,
        event: &EventEnvelope<JsonValue>,
    ) -> Result<(), NotificationError> {
        let pair = self
            .pairs
            .get(event.aggregate_type())
            .ok_or_else(|| NotificationError::MissingPair {
                entity_type: event.aggregate_type().to_string(),
                stream: stream.clone(),
            })?;

        let published =
            pair.publisher
                .publish(event)
                .ok_or_else(|| NotificationError::Publisher {
                    publisher: pair.publisher.name().to_string(),
                    stream: stream.clone(),
                    event_id: event.event_id(),
                })?;

        let accepted =
            pair.subscriber
                .notify(&published)
                .map_err(|source| NotificationError::SubscriberFailed {
                    subscriber: pair.subscriber.name().to_string(),
                    stream: stream.clone(),
                    event_id: event.event_id(),
                    source,
                })?;
        if !accepted {
            return Err(NotificationError::Subscriber {
                subscriber: pair.subscriber.name().to_string(),
                stream: stream.clone(),
                event_id: event.event_id(),
            });
        }

        debug!(
            producer = %self.name,
            stream = %stream,
            version = event.version(),
            published = %published.event_type,
            subscriber = pair.subscriber.name(),
            "event delivered"
        );
        Ok(())
    }
}

impl core::fmt::Debug for NotificationProducer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationProducer")
            .field("name", &self.name)
            .field("entity_types", &self.entity_types())
            .finish()
    }
}

impl StreamHandler for NotificationProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_event_stream(
        &self,
        stream: &StreamName,
        events: &[EventEnvelope<JsonValue>],
    ) -> anyhow::Result<()> {
        for event in events {
            self.deliver(stream, event)?;
        }
        Ok(())
    }
}
