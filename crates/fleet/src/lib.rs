//! Fleet domain module (event-sourced).
//!
//! This crate contains business rules for cars and drivers, implemented purely
//! as deterministic domain logic (no IO, no storage).

pub mod car;
pub mod driver;
pub mod plate;

pub use car::{
    AssignDriver, Car, CarCommand, CarCreated, CarDecommissioned, CarEvent, CarRegistered,
    CarStatus, CreateCar, DecommissionCar, DriverAssigned, RegisterCar,
};
pub use driver::{
    CarAssignedToDriver, Driver, DriverCommand, DriverEvent, DriverRegistered,
    RecordCarAssignment, RegisterDriver,
};
pub use plate::Plate;

use fleetstream_core::{DomainFactory, FactoryError};

/// Domain factory with every fleet entity and value object registered.
pub fn domain_factory() -> Result<DomainFactory, FactoryError> {
    Ok(DomainFactory::builder()
        .register_entity::<Car>()?
        .register_entity::<Driver>()?
        .register_value_object::<Plate>()?
        .build())
}
