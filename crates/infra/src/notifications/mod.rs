//! Cross-aggregate notification pairs for the fleet domain.

pub mod car_assignment;

use std::sync::Arc;

use fleetstream_events::{NotificationError, NotificationProducer};
use fleetstream_fleet::Driver;

use crate::event_store::EventStore;
use crate::repository::AggregateRepository;

pub use car_assignment::{notice_types, CarEventPublisher, DriverAssignedNotice, DriverRosterSubscriber};

/// Producer forwarding car events to the driver roster.
pub fn fleet_notifications<S>(
    drivers: AggregateRepository<S, Driver>,
) -> Result<NotificationProducer, NotificationError>
where
    S: EventStore + 'static,
{
    NotificationProducer::builder("fleet.notifications")
        .pair(
            Arc::new(CarEventPublisher),
            Arc::new(DriverRosterSubscriber::new(drivers)),
        )
        .build()
}
