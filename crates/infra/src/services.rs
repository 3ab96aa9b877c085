//! In-memory wiring of the fleet pipeline.
//!
//! ```text
//! cars repository ──append──▶ car store ──ChangeBatch──▶ relay "fleet.cars"
//!                                                         ├─ car list projector
//!                                                         └─ notification producer ──▶ drivers repository
//! drivers repository ──append──▶ driver store
//! ```
//!
//! Cars and drivers live in separate stores so the car relay only ever sees
//! `fleet.car` streams; every stream it receives has a notification pair.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use fleetstream_core::{AggregateId, DomainFactory, FactoryError};
use fleetstream_events::{EventRelay, NotificationError, StreamHandler};
use fleetstream_fleet::{domain_factory, Car, Driver};

use crate::config::FleetstreamConfig;
use crate::event_store::{InMemoryEventStore, NotifyingEventStore};
use crate::notifications::fleet_notifications;
use crate::projections::{
    replay_projector, CarListProjection, CarListRow, InMemoryCheckpointStore, ReadModelProjector,
    ReplayError, ReplayMode, ReplayReport,
};
use crate::read_model::InMemoryReadModelStore;
use crate::repository::AggregateRepository;

pub type FleetStore = Arc<NotifyingEventStore<InMemoryEventStore>>;
pub type CarListStore = Arc<InMemoryReadModelStore<AggregateId, CarListRow>>;
pub type CarListProjector = ReadModelProjector<CarListProjection<CarListStore>, Arc<InMemoryCheckpointStore>>;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("domain factory: {0}")]
    Factory(#[from] FactoryError),

    #[error("notification wiring: {0}")]
    Notification(#[from] NotificationError),
}

pub struct FleetServices {
    pub factory: Arc<DomainFactory>,
    pub car_store: FleetStore,
    pub driver_store: FleetStore,
    pub cars: AggregateRepository<FleetStore, Car>,
    pub drivers: AggregateRepository<FleetStore, Driver>,
    pub car_list: Arc<CarListProjector>,
    pub relay: Arc<EventRelay>,
}

impl FleetServices {
    /// Build the pipeline. The relay is built but not started.
    pub fn in_memory(config: &FleetstreamConfig) -> Result<Self, ServicesError> {
        let factory = Arc::new(domain_factory()?);
        let car_store: FleetStore = Arc::new(NotifyingEventStore::new(InMemoryEventStore::new()));
        let driver_store: FleetStore = Arc::new(NotifyingEventStore::new(InMemoryEventStore::new()));

        let car_list = Arc::new(ReadModelProjector::new(
            CarListProjection::new(Arc::new(InMemoryReadModelStore::new()), factory.clone()),
            Arc::new(InMemoryCheckpointStore::new()),
        ));
        let notifications = fleet_notifications(AggregateRepository::<_, Driver>::new(
            driver_store.clone(),
            factory.clone(),
        ))?;

        let relay = EventRelay::builder("fleet.cars")
            .handler(car_list.clone() as Arc<dyn StreamHandler>)
            .handler(Arc::new(notifications))
            .config(config.relay.clone())
            .build();

        info!(parallel = config.relay.parallel_partitions, "fleet services wired");
        Ok(Self {
            cars: AggregateRepository::new(car_store.clone(), factory.clone()),
            drivers: AggregateRepository::new(driver_store.clone(), factory.clone()),
            factory,
            car_store,
            driver_store,
            car_list,
            relay,
        })
    }

    /// Synchronous delivery: subscribe the relay to the car store.
    pub fn start(&self) -> bool {
        self.relay.start(self.car_store.notifier())
    }

    pub fn stop(&self) {
        self.relay.stop();
    }

    /// Re-drive the car store through the car list projector.
    pub fn replay_car_list(&self, mode: ReplayMode) -> Result<ReplayReport, ReplayError> {
        replay_projector(self.car_store.as_ref(), self.car_list.as_ref(), mode)
    }
}
