//! `fleetstream-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers and stream names, aggregate traits with optimistic versioning,
//! domain errors, and the explicit domain factory registry used to rehydrate
//! entities and value objects.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod factory;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, EventSourced, ExpectedVersion};
pub use entity::{Entity, EntityFactory};
pub use error::{DomainError, DomainResult};
pub use factory::{DomainFactory, DomainFactoryBuilder, FactoryError, PropertyBag};
pub use id::{AggregateId, StreamName};
pub use value_object::{ValueObject, ValueObjectFactory};
