//! Car → Driver notification pair.
//!
//! The car stream is the source of truth for assignments; drivers keep a
//! roster that follows it:
//! 1. Car `DriverAssigned` appended → published as `car.driver_assigned`
//! 2. Driver roster subscriber → `RecordCarAssignment` on the driver stream
//!
//! Other car events are published too and acknowledged without action.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use fleetstream_core::{AggregateId, AggregateRoot};
use fleetstream_events::{Decoded, EventEnvelope, PublishedEvent, Publisher, Subscriber};
use fleetstream_fleet::{Car, CarEvent, Driver, DriverCommand, RecordCarAssignment};

use crate::event_store::EventStore;
use crate::repository::AggregateRepository;

/// Published event types.
pub mod notice_types {
    pub const CAR_CREATED: &str = "car.created";
    pub const CAR_REGISTERED: &str = "car.registered";
    pub const CAR_DRIVER_ASSIGNED: &str = "car.driver_assigned";
    pub const CAR_DECOMMISSIONED: &str = "car.decommissioned";
}

/// Payload of `car.driver_assigned`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverAssignedNotice {
    pub car_id: AggregateId,
    pub driver_id: AggregateId,
}

/// Publishes every car event under a `car.*` type.
#[derive(Debug, Default, Clone, Copy)]
pub struct CarEventPublisher;

impl Publisher for CarEventPublisher {
    fn name(&self) -> &str {
        "fleet.car_publisher"
    }

    fn entity_type(&self) -> &str {
        Car::AGGREGATE_TYPE
    }

    fn publish(&self, event: &EventEnvelope<JsonValue>) -> Option<PublishedEvent> {
        let decoded = match event.decode::<CarEvent>() {
            Ok(Decoded::Known(e)) => e,
            Ok(Decoded::Unknown { event_type }) => {
                warn!(stream = %event.stream_name(), event_type = %event_type, "unmapped car event");
                return None;
            }
            Err(err) => {
                warn!(stream = %event.stream_name(), error = %err, "undecodable car event");
                return None;
            }
        };

        let (event_type, payload) = match decoded {
            CarEvent::CarCreated(e) => (notice_types::CAR_CREATED, json!({ "car_id": e.car_id })),
            CarEvent::CarRegistered(e) => (
                notice_types::CAR_REGISTERED,
                json!({ "car_id": e.car_id, "plate": e.plate.as_str() }),
            ),
            CarEvent::DriverAssigned(e) => (
                notice_types::CAR_DRIVER_ASSIGNED,
                serde_json::to_value(DriverAssignedNotice {
                    car_id: e.car_id,
                    driver_id: e.driver_id,
                })
                .ok()?,
            ),
            CarEvent::CarDecommissioned(e) => (
                notice_types::CAR_DECOMMISSIONED,
                json!({ "car_id": e.car_id, "reason": e.reason }),
            ),
        };

        Some(PublishedEvent::from_source(event, event_type, payload))
    }
}

/// Keeps driver rosters in step with car assignments.
pub struct DriverRosterSubscriber<S> {
    drivers: AggregateRepository<S, Driver>,
}

impl<S> DriverRosterSubscriber<S>
where
    S: EventStore,
{
    pub fn new(drivers: AggregateRepository<S, Driver>) -> Self {
        Self { drivers }
    }

    pub fn drivers(&self) -> &AggregateRepository<S, Driver> {
        &self.drivers
    }
}

impl<S> Subscriber for DriverRosterSubscriber<S>
where
    S: EventStore,
{
    fn name(&self) -> &str {
        "fleet.driver_roster"
    }

    fn notify(&self, event: &PublishedEvent) -> anyhow::Result<bool> {
        match event.event_type.as_str() {
            notice_types::CAR_DRIVER_ASSIGNED => {
                let notice: DriverAssignedNotice = serde_json::from_value(event.payload.clone())?;
                let command = DriverCommand::RecordCarAssignment(RecordCarAssignment {
                    driver_id: notice.driver_id.clone(),
                    car_id: notice.car_id.clone(),
                    occurred_at: event.occurred_at,
                });
                let outcome = self.drivers.execute(&notice.driver_id, &command)?;
                debug!(
                    driver = %notice.driver_id,
                    car = %notice.car_id,
                    recorded = !outcome.events.is_empty(),
                    "car assignment forwarded to driver"
                );
                Ok(true)
            }
            other if other.starts_with("car.") => Ok(true),
            _ => Ok(false),
        }
    }
}
