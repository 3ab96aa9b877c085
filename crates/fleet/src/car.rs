use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetstream_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Entity, EntityFactory, FactoryError,
    PropertyBag,
};
use fleetstream_events::{Event, EventKinds};

use crate::plate::Plate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarStatus {
    InService,
    Decommissioned,
}

impl CarStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CarStatus::InService => "in_service",
            CarStatus::Decommissioned => "decommissioned",
        }
    }
}

/// Aggregate root: Car.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Car {
    id: AggregateId,
    plate: Option<Plate>,
    driver_id: Option<AggregateId>,
    status: CarStatus,
    version: u64,
    created: bool,
}

impl Car {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            plate: None,
            driver_id: None,
            status: CarStatus::InService,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> &AggregateId {
        &self.id
    }

    pub fn plate(&self) -> Option<&Plate> {
        self.plate.as_ref()
    }

    pub fn driver_id(&self) -> Option<&AggregateId> {
        self.driver_id.as_ref()
    }

    pub fn status(&self) -> CarStatus {
        self.status
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Car {
    const AGGREGATE_TYPE: &'static str = "fleet.car";

    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Entity for Car {
    fn entity_id(&self) -> &AggregateId {
        &self.id
    }
}

impl EntityFactory for Car {
    const TYPE_NAME: &'static str = Car::AGGREGATE_TYPE;

    fn from_property_bag(bag: &PropertyBag) -> Result<Self, FactoryError> {
        Ok(Car::empty(bag.require("id")?))
    }
}

/// Command: CreateCar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCar {
    pub car_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterCar (attach or replace the licence plate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCar {
    pub car_id: AggregateId,
    pub plate: Plate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignDriver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignDriver {
    pub car_id: AggregateId,
    pub driver_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DecommissionCar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecommissionCar {
    pub car_id: AggregateId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarCommand {
    CreateCar(CreateCar),
    RegisterCar(RegisterCar),
    AssignDriver(AssignDriver),
    DecommissionCar(DecommissionCar),
}

/// Event: CarCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarCreated {
    pub car_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CarRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarRegistered {
    pub car_id: AggregateId,
    pub plate: Plate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DriverAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverAssigned {
    pub car_id: AggregateId,
    pub driver_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CarDecommissioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarDecommissioned {
    pub car_id: AggregateId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarEvent {
    CarCreated(CarCreated),
    CarRegistered(CarRegistered),
    DriverAssigned(DriverAssigned),
    CarDecommissioned(CarDecommissioned),
}

impl CarEvent {
    pub const CREATED: &'static str = "fleet.car.created";
    pub const REGISTERED: &'static str = "fleet.car.registered";
    pub const DRIVER_ASSIGNED: &'static str = "fleet.car.driver_assigned";
    pub const DECOMMISSIONED: &'static str = "fleet.car.decommissioned";
}

impl Event for CarEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CarEvent::CarCreated(_) => CarEvent::CREATED,
            CarEvent::CarRegistered(_) => CarEvent::REGISTERED,
            CarEvent::DriverAssigned(_) => CarEvent::DRIVER_ASSIGNED,
            CarEvent::CarDecommissioned(_) => CarEvent::DECOMMISSIONED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CarEvent::CarCreated(e) => e.occurred_at,
            CarEvent::CarRegistered(e) => e.occurred_at,
            CarEvent::DriverAssigned(e) => e.occurred_at,
            CarEvent::CarDecommissioned(e) => e.occurred_at,
        }
    }
}

impl EventKinds for CarEvent {
    const EVENT_TYPES: &'static [&'static str] = &[
        CarEvent::CREATED,
        CarEvent::REGISTERED,
        CarEvent::DRIVER_ASSIGNED,
        CarEvent::DECOMMISSIONED,
    ];
}

impl Aggregate for Car {
    type Command = CarCommand;
    type Event = CarEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CarEvent::CarCreated(e) => {
                self.id = e.car_id.clone();
                self.status = CarStatus::InService;
                self.created = true;
            }
            CarEvent::CarRegistered(e) => {
                self.plate = Some(e.plate.clone());
            }
            CarEvent::DriverAssigned(e) => {
                self.driver_id = Some(e.driver_id.clone());
            }
            CarEvent::CarDecommissioned(_) => {
                self.driver_id = None;
                self.status = CarStatus::Decommissioned;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CarCommand::CreateCar(cmd) => self.handle_create(cmd),
            CarCommand::RegisterCar(cmd) => self.handle_register(cmd),
            CarCommand::AssignDriver(cmd) => self.handle_assign(cmd),
            CarCommand::DecommissionCar(cmd) => self.handle_decommission(cmd),
        }
    }
}

impl Car {
    fn ensure_car_id(&self, car_id: &AggregateId) -> Result<(), DomainError> {
        if &self.id != car_id {
            return Err(DomainError::invariant("car_id mismatch"));
        }
        Ok(())
    }

    fn ensure_in_service(&self, car_id: &AggregateId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_car_id(car_id)?;
        if self.status == CarStatus::Decommissioned {
            return Err(DomainError::invariant("car is decommissioned"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateCar) -> Result<Vec<CarEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("car already exists"));
        }
        self.ensure_car_id(&cmd.car_id)?;
        Ok(vec![CarEvent::CarCreated(CarCreated {
            car_id: cmd.car_id.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register(&self, cmd: &RegisterCar) -> Result<Vec<CarEvent>, DomainError> {
        self.ensure_in_service(&cmd.car_id)?;
        if self.plate.as_ref() == Some(&cmd.plate) {
            return Ok(vec![]);
        }
        Ok(vec![CarEvent::CarRegistered(CarRegistered {
            car_id: cmd.car_id.clone(),
            plate: cmd.plate.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign(&self, cmd: &AssignDriver) -> Result<Vec<CarEvent>, DomainError> {
        self.ensure_in_service(&cmd.car_id)?;
        if self.plate.is_none() {
            return Err(DomainError::invariant(
                "car must be registered before a driver is assigned",
            ));
        }
        if self.driver_id.as_ref() == Some(&cmd.driver_id) {
            return Ok(vec![]);
        }
        Ok(vec![CarEvent::DriverAssigned(DriverAssigned {
            car_id: cmd.car_id.clone(),
            driver_id: cmd.driver_id.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_decommission(&self, cmd: &DecommissionCar) -> Result<Vec<CarEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_car_id(&cmd.car_id)?;
        if self.status == CarStatus::Decommissioned {
            return Err(DomainError::conflict("car already decommissioned"));
        }
        Ok(vec![CarEvent::CarDecommissioned(CarDecommissioned {
            car_id: cmd.car_id.clone(),
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
