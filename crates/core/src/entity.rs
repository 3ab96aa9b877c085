//! Entity traits: identity + continuity across state changes.

use crate::factory::{FactoryError, PropertyBag};
use crate::id::AggregateId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Returns the entity identifier.
    fn entity_id(&self) -> &AggregateId;
}

/// Constructor used by the domain factory to rehydrate an entity from a
/// persisted property bag.
///
/// Each implementing type is registered once under `TYPE_NAME`; see
/// [`DomainFactoryBuilder::register_entity`](crate::DomainFactoryBuilder::register_entity).
pub trait EntityFactory: Sized + Send + 'static {
    /// Stable type identifier (e.g. "fleet.car").
    const TYPE_NAME: &'static str;

    fn from_property_bag(bag: &PropertyBag) -> Result<Self, FactoryError>;
}
