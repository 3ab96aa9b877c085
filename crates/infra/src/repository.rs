//! Aggregate repository: `Load` / `Save` on top of an [`EventStore`].
//!
//! ```text
//! load(id)
//!   1. load the stream "<aggregate_type>-<id>" (empty → NotFound)
//!   2. validate versions are 1, 2, 3, … (contiguous)
//!   3. build the empty aggregate through the domain factory
//!   4. fold every decoded event through `apply`
//!
//! save(&mut tracked)
//!   1. serialize only the uncommitted events
//!   2. append with the base version as the concurrency expectation
//!   3. mark the events committed
//! ```
//!
//! Notification of the appended batch is the store's job (see
//! [`NotifyingEventStore`](crate::event_store::NotifyingEventStore)); the
//! repository holds no locks while the store notifies, so handlers may save
//! other aggregates through their own repositories.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use fleetstream_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainFactory, EntityFactory,
    EventSourced, ExpectedVersion, FactoryError, PropertyBag, StreamName,
};
use fleetstream_events::{decode_event, DecodeError, Decoded, EventKinds};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("stream '{stream}' not found")]
    NotFound { stream: StreamName },

    /// Optimistic concurrency failure; reload and retry.
    #[error("stream '{stream}' changed concurrently (expected {expected:?}, actual {actual})")]
    Concurrency {
        stream: StreamName,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("stream '{stream}' is corrupt: {reason}")]
    CorruptStream { stream: StreamName, reason: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("domain factory: {0}")]
    Factory(#[from] FactoryError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("event store: {0}")]
    Store(EventStoreError),
}

impl From<EventStoreError> for RepositoryError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency {
                stream,
                expected,
                actual,
            } => RepositoryError::Concurrency {
                stream,
                expected,
                actual,
            },
            other => RepositoryError::Store(other),
        }
    }
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    /// The events just persisted (empty when there was nothing to save).
    pub events: Vec<StoredEvent>,
    pub new_version: u64,
}

/// Loads and saves one aggregate type.
pub struct AggregateRepository<S, A> {
    store: S,
    factory: Arc<DomainFactory>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<S, A> AggregateRepository<S, A> {
    pub fn new(store: S, factory: Arc<DomainFactory>) -> Self {
        Self {
            store,
            factory,
            _aggregate: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, A> AggregateRepository<S, A>
where
    S: EventStore,
    A: Aggregate<Error = DomainError> + EntityFactory,
    A::Event: EventKinds + Serialize,
{
    pub fn stream_name(id: &AggregateId) -> StreamName {
        StreamName::for_aggregate(A::AGGREGATE_TYPE, id)
    }

    /// Rehydrate the aggregate from its full stream.
    pub fn load(&self, id: &AggregateId) -> Result<EventSourced<A>, RepositoryError> {
        let stream = Self::stream_name(id);
        let history = self.store.load_stream(&stream)?;
        if history.is_empty() {
            return Err(RepositoryError::NotFound { stream });
        }
        self.rehydrate(id, &stream, &history)
    }

    /// Like [`load`](Self::load), but a missing stream yields a fresh aggregate.
    pub fn load_or_new(&self, id: &AggregateId) -> Result<EventSourced<A>, RepositoryError> {
        let stream = Self::stream_name(id);
        let history = self.store.load_stream(&stream)?;
        self.rehydrate(id, &stream, &history)
    }

    /// Persist the aggregate's uncommitted events.
    ///
    /// Fails with [`RepositoryError::Concurrency`] when the stream moved past
    /// the aggregate's base version; nothing is appended and the aggregate
    /// keeps its uncommitted events.
    pub fn save(&self, tracked: &mut EventSourced<A>) -> Result<SaveOutcome, RepositoryError> {
        if !tracked.has_uncommitted() {
            return Ok(SaveOutcome {
                events: vec![],
                new_version: tracked.base_version(),
            });
        }

        let id = tracked.aggregate().id().clone();
        let stream = Self::stream_name(&id);
        let uncommitted = tracked
            .uncommitted()
            .iter()
            .map(|ev| UncommittedEvent::from_typed(id.clone(), A::AGGREGATE_TYPE, ev))
            .collect::<Result<Vec<_>, _>>()?;

        let expected = ExpectedVersion::from_base(tracked.base_version());
        let committed = self.store.append(&stream, uncommitted, expected)?;
        tracked.mark_committed();

        let new_version = committed.last().map(|e| e.version).unwrap_or(tracked.base_version());
        debug!(stream = %stream, events = committed.len(), version = new_version, "aggregate saved");
        Ok(SaveOutcome {
            events: committed,
            new_version,
        })
    }

    /// Load (or create), handle `command`, and save.
    pub fn execute(
        &self,
        id: &AggregateId,
        command: &A::Command,
    ) -> Result<SaveOutcome, RepositoryError> {
        let mut tracked = self.load_or_new(id)?;
        tracked.execute(command)?;
        self.save(&mut tracked)
    }

    fn rehydrate(
        &self,
        id: &AggregateId,
        stream: &StreamName,
        history: &[StoredEvent],
    ) -> Result<EventSourced<A>, RepositoryError> {
        validate_loaded_stream(stream, history)?;

        let bag = PropertyBag::new().with("id", id.as_str());
        let mut aggregate: A = self.factory.rehydrate_entity(A::AGGREGATE_TYPE, &bag)?;

        for stored in history {
            match decode_event::<A::Event>(&stored.event_type, &stored.payload)? {
                Decoded::Known(ev) => aggregate.apply(&ev),
                Decoded::Unknown { event_type } => {
                    return Err(RepositoryError::CorruptStream {
                        stream: stream.clone(),
                        reason: format!(
                            "event {} has unknown type '{event_type}'",
                            stored.version
                        ),
                    });
                }
            }
        }

        Ok(EventSourced::new(aggregate))
    }
}

/// Versions must be exactly 1, 2, 3, … and belong to `stream`.
fn validate_loaded_stream(stream: &StreamName, history: &[StoredEvent]) -> Result<(), RepositoryError> {
    for (idx, e) in history.iter().enumerate() {
        if &e.stream_name != stream {
            return Err(RepositoryError::CorruptStream {
                stream: stream.clone(),
                reason: format!("event at index {idx} belongs to '{}'", e.stream_name),
            });
        }
        let expected = idx as u64 + 1;
        if e.version != expected {
            return Err(RepositoryError::CorruptStream {
                stream: stream.clone(),
                reason: format!("expected version {expected}, found {}", e.version),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use chrono::Utc;
    use fleetstream_fleet::{domain_factory, Car, CarCommand, CreateCar, Plate, RegisterCar};

    fn repo() -> AggregateRepository<Arc<InMemoryEventStore>, Car> {
        AggregateRepository::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(domain_factory().unwrap()),
        )
    }

    fn car_id() -> AggregateId {
        AggregateId::parse("car-1").unwrap()
    }

    fn create() -> CarCommand {
        CarCommand::CreateCar(CreateCar {
            car_id: car_id(),
            occurred_at: Utc::now(),
        })
    }

    fn register(plate: &str) -> CarCommand {
        CarCommand::RegisterCar(RegisterCar {
            car_id: car_id(),
            plate: Plate::parse(plate).unwrap(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn load_of_empty_stream_is_not_found() {
        let err = repo().load(&car_id()).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }

    #[test]
    fn save_then_load_rehydrates_state() {
        let repo = repo();
        repo.execute(&car_id(), &create()).unwrap();
        let outcome = repo.execute(&car_id(), &register("ABC123")).unwrap();
        assert_eq!(outcome.new_version, 2);

        let loaded = repo.load(&car_id()).unwrap();
        assert_eq!(loaded.version(), 2);
        assert_eq!(loaded.aggregate().plate().map(Plate::as_str), Some("ABC123"));
    }

    #[test]
    fn load_save_load_is_stable() {
        let repo = repo();
        repo.execute(&car_id(), &create()).unwrap();
        repo.execute(&car_id(), &register("ABC123")).unwrap();

        let mut first = repo.load(&car_id()).unwrap();
        let outcome = repo.save(&mut first).unwrap();
        assert!(outcome.events.is_empty());

        let second = repo.load(&car_id()).unwrap();
        assert_eq!(first.aggregate(), second.aggregate());
    }

    #[test]
    fn stale_save_is_a_concurrency_error_and_appends_nothing() {
        let repo = repo();
        repo.execute(&car_id(), &create()).unwrap();

        let mut a = repo.load(&car_id()).unwrap();
        let mut b = repo.load(&car_id()).unwrap();
        a.execute(&register("AAA111")).unwrap();
        b.execute(&register("BBB222")).unwrap();

        repo.save(&mut a).unwrap();
        let err = repo.save(&mut b).unwrap_err();

        assert!(matches!(err, RepositoryError::Concurrency { actual: 2, .. }));
        assert!(b.has_uncommitted());
        assert_eq!(repo.store().stream_version(&a.aggregate().stream_name()).unwrap(), 2);
    }

    #[test]
    fn domain_rejection_is_surfaced() {
        let err = repo().execute(&car_id(), &register("ABC123")).unwrap_err();
        assert!(matches!(err, RepositoryError::Domain(DomainError::NotFound)));
    }

    #[test]
    fn unknown_event_in_own_stream_is_corruption() {
        let repo = repo();
        repo.execute(&car_id(), &create()).unwrap();
        let stream = Repo::stream_name(&car_id());
        repo.store()
            .append(
                &stream,
                vec![UncommittedEvent {
                    event_id: uuid::Uuid::now_v7(),
                    aggregate_id: car_id(),
                    aggregate_type: "fleet.car".to_string(),
                    event_type: "fleet.car.painted".to_string(),
                    event_version: 1,
                    occurred_at: Utc::now(),
                    payload: serde_json::json!({}),
                }],
                ExpectedVersion::Exact(1),
            )
            .unwrap();

        assert!(matches!(
            repo.load(&car_id()),
            Err(RepositoryError::CorruptStream { .. })
        ));
    }

    type Repo = AggregateRepository<Arc<InMemoryEventStore>, Car>;

    #[test]
    fn gap_in_loaded_stream_is_corruption() {
        let stream = Repo::stream_name(&car_id());
        let mk = |version| StoredEvent {
            event_id: uuid::Uuid::now_v7(),
            stream_name: stream.clone(),
            aggregate_id: car_id(),
            aggregate_type: "fleet.car".to_string(),
            version,
            event_type: "fleet.car.created".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        };
        let err = validate_loaded_stream(&stream, &[mk(1), mk(3)]).unwrap_err();
        assert!(matches!(err, RepositoryError::CorruptStream { .. }));
    }
}
