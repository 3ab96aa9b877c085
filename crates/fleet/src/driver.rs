use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetstream_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Entity, EntityFactory, FactoryError,
    PropertyBag,
};
use fleetstream_events::{Event, EventKinds};

/// Aggregate root: Driver.
///
/// Keeps the roster of cars the driver has been assigned. Assignments arrive
/// from the car stream through domain-event notification, so recording the
/// same car twice is accepted and emits nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Driver {
    id: AggregateId,
    name: String,
    cars: Vec<AggregateId>,
    version: u64,
    created: bool,
}

impl Driver {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            name: String::new(),
            cars: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cars(&self) -> &[AggregateId] {
        &self.cars
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Driver {
    const AGGREGATE_TYPE: &'static str = "fleet.driver";

    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Entity for Driver {
    fn entity_id(&self) -> &AggregateId {
        &self.id
    }
}

impl EntityFactory for Driver {
    const TYPE_NAME: &'static str = Driver::AGGREGATE_TYPE;

    fn from_property_bag(bag: &PropertyBag) -> Result<Self, FactoryError> {
        Ok(Driver::empty(bag.require("id")?))
    }
}

/// Command: RegisterDriver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDriver {
    pub driver_id: AggregateId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordCarAssignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCarAssignment {
    pub driver_id: AggregateId,
    pub car_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverCommand {
    RegisterDriver(RegisterDriver),
    RecordCarAssignment(RecordCarAssignment),
}

/// Event: DriverRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRegistered {
    pub driver_id: AggregateId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CarAssignedToDriver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarAssignedToDriver {
    pub driver_id: AggregateId,
    pub car_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverEvent {
    DriverRegistered(DriverRegistered),
    CarAssignedToDriver(CarAssignedToDriver),
}

impl DriverEvent {
    pub const REGISTERED: &'static str = "fleet.driver.registered";
    pub const CAR_ASSIGNED: &'static str = "fleet.driver.car_assigned";
}

impl Event for DriverEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DriverEvent::DriverRegistered(_) => DriverEvent::REGISTERED,
            DriverEvent::CarAssignedToDriver(_) => DriverEvent::CAR_ASSIGNED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DriverEvent::DriverRegistered(e) => e.occurred_at,
            DriverEvent::CarAssignedToDriver(e) => e.occurred_at,
        }
    }
}

impl EventKinds for DriverEvent {
    const EVENT_TYPES: &'static [&'static str] = &[DriverEvent::REGISTERED, DriverEvent::CAR_ASSIGNED];
}

impl Aggregate for Driver {
    type Command = DriverCommand;
    type Event = DriverEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DriverEvent::DriverRegistered(e) => {
                self.id = e.driver_id.clone();
                self.name = e.name.clone();
                self.created = true;
            }
            DriverEvent::CarAssignedToDriver(e) => {
                if !self.cars.contains(&e.car_id) {
                    self.cars.push(e.car_id.clone());
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DriverCommand::RegisterDriver(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("driver already exists"));
                }
                if self.id != cmd.driver_id {
                    return Err(DomainError::invariant("driver_id mismatch"));
                }
                if cmd.name.trim().is_empty() {
                    return Err(DomainError::validation("name cannot be empty"));
                }
                Ok(vec![DriverEvent::DriverRegistered(DriverRegistered {
                    driver_id: cmd.driver_id.clone(),
                    name: cmd.name.trim().to_string(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            DriverCommand::RecordCarAssignment(cmd) => {
                if !self.created {
                    return Err(DomainError::not_found());
                }
                if self.id != cmd.driver_id {
                    return Err(DomainError::invariant("driver_id mismatch"));
                }
                if self.cars.contains(&cmd.car_id) {
                    return Ok(vec![]);
                }
                Ok(vec![DriverEvent::CarAssignedToDriver(CarAssignedToDriver {
                    driver_id: cmd.driver_id.clone(),
                    car_id: cmd.car_id.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}
