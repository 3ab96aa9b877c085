//! Value object traits: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.

use crate::factory::FactoryError;

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" a value
/// object, create a new one with the new values.
///
/// ## Value Object vs Entity
///
/// - **Value Object**: No identity (two value objects with same values are equal)
/// - **Entity**: Has identity (two entities with same ID are the same entity)
///
/// Example:
/// - `Plate("ABC123")` is a value object
/// - `Car { id: "car-1", ... }` is an entity
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Constructor used by the domain factory to rehydrate a value object from
/// its persisted string form.
pub trait ValueObjectFactory: ValueObject + Send + 'static {
    /// Stable type identifier (e.g. "fleet.plate").
    const TYPE_NAME: &'static str;

    fn from_persisted(value: &str) -> Result<Self, FactoryError>;
}
