//! Domain factory: explicit registry of entity and value-object constructors.
//!
//! Every rehydratable type is registered exactly once at startup, either
//! through its [`EntityFactory`] / [`ValueObjectFactory`] impl or with a plain
//! constructor function. The built [`DomainFactory`] is immutable; lookups
//! against unregistered type names fail with [`FactoryError::TypeNotFound`].

use std::any::Any;
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

use crate::entity::EntityFactory;
use crate::value_object::ValueObjectFactory;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FactoryError {
    #[error("factory already registered for type '{type_name}'")]
    DuplicateRegistration { type_name: String },

    #[error("no factory registered for type '{type_name}'")]
    TypeNotFound { type_name: String },

    #[error("factory for '{type_name}' does not produce {expected}")]
    TypeMismatch {
        type_name: String,
        expected: &'static str,
    },

    #[error("missing property '{property}'")]
    MissingProperty { property: String },

    #[error("invalid property '{property}': {reason}")]
    InvalidProperty { property: String, reason: String },

    #[error("invalid value for '{type_name}': {reason}")]
    InvalidValue { type_name: String, reason: String },
}

impl FactoryError {
    pub fn invalid_value(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }
}

/// Named properties an entity is rehydrated from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag(Map<String, JsonValue>);

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn require_str(&self, key: &str) -> Result<&str, FactoryError> {
        match self.0.get(key) {
            None | Some(JsonValue::Null) => Err(FactoryError::MissingProperty {
                property: key.to_string(),
            }),
            Some(JsonValue::String(s)) => Ok(s),
            Some(other) => Err(FactoryError::InvalidProperty {
                property: key.to_string(),
                reason: format!("expected string, found {other}"),
            }),
        }
    }

    /// Deserialize a required property into `T`.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, FactoryError> {
        let value = self.0.get(key).ok_or_else(|| FactoryError::MissingProperty {
            property: key.to_string(),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| FactoryError::InvalidProperty {
            property: key.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, JsonValue>> for PropertyBag {
    fn from(value: Map<String, JsonValue>) -> Self {
        Self(value)
    }
}

type EntityCtor =
    Box<dyn Fn(&PropertyBag) -> Result<Box<dyn Any + Send>, FactoryError> + Send + Sync>;
type ValueObjectCtor = Box<dyn Fn(&str) -> Result<Box<dyn Any + Send>, FactoryError> + Send + Sync>;

/// Collects registrations; call [`build`](Self::build) once all are in.
#[derive(Default)]
pub struct DomainFactoryBuilder {
    entities: HashMap<&'static str, EntityCtor>,
    value_objects: HashMap<&'static str, ValueObjectCtor>,
}

impl DomainFactoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its declared `TYPE_NAME`.
    pub fn register_entity<T: EntityFactory>(self) -> Result<Self, FactoryError> {
        self.register_entity_with(T::TYPE_NAME, T::from_property_bag)
    }

    /// Register an entity constructor under an explicit type name.
    pub fn register_entity_with<T>(
        mut self,
        type_name: &'static str,
        ctor: fn(&PropertyBag) -> Result<T, FactoryError>,
    ) -> Result<Self, FactoryError>
    where
        T: Send + 'static,
    {
        if self.entities.contains_key(type_name) {
            return Err(FactoryError::DuplicateRegistration {
                type_name: type_name.to_string(),
            });
        }
        self.entities.insert(
            type_name,
            Box::new(move |bag: &PropertyBag| ctor(bag).map(|v| Box::new(v) as Box<dyn Any + Send>)),
        );
        Ok(self)
    }

    /// Register `T` under its declared `TYPE_NAME`.
    pub fn register_value_object<T: ValueObjectFactory>(self) -> Result<Self, FactoryError> {
        self.register_value_object_with(T::TYPE_NAME, T::from_persisted)
    }

    /// Register a value-object constructor under an explicit type name.
    pub fn register_value_object_with<T>(
        mut self,
        type_name: &'static str,
        ctor: fn(&str) -> Result<T, FactoryError>,
    ) -> Result<Self, FactoryError>
    where
        T: Send + 'static,
    {
        if self.value_objects.contains_key(type_name) {
            return Err(FactoryError::DuplicateRegistration {
                type_name: type_name.to_string(),
            });
        }
        self.value_objects.insert(
            type_name,
            Box::new(move |s: &str| ctor(s).map(|v| Box::new(v) as Box<dyn Any + Send>)),
        );
        Ok(self)
    }

    pub fn build(self) -> DomainFactory {
        debug!(
            entities = self.entities.len(),
            value_objects = self.value_objects.len(),
            "domain factory built"
        );
        DomainFactory {
            entities: self.entities,
            value_objects: self.value_objects,
        }
    }
}

/// Immutable registry of rehydration constructors.
pub struct DomainFactory {
    entities: HashMap<&'static str, EntityCtor>,
    value_objects: HashMap<&'static str, ValueObjectCtor>,
}

impl DomainFactory {
    pub fn builder() -> DomainFactoryBuilder {
        DomainFactoryBuilder::new()
    }

    pub fn rehydrate_entity<T: 'static>(
        &self,
        type_name: &str,
        bag: &PropertyBag,
    ) -> Result<T, FactoryError> {
        let ctor = self
            .entities
            .get(type_name)
            .ok_or_else(|| FactoryError::TypeNotFound {
                type_name: type_name.to_string(),
            })?;
        downcast(type_name, ctor(bag)?)
    }

    pub fn rehydrate_value_object<T: 'static>(
        &self,
        type_name: &str,
        value: &str,
    ) -> Result<T, FactoryError> {
        let ctor = self
            .value_objects
            .get(type_name)
            .ok_or_else(|| FactoryError::TypeNotFound {
                type_name: type_name.to_string(),
            })?;
        downcast(type_name, ctor(value)?)
    }

    pub fn has_entity(&self, type_name: &str) -> bool {
        self.entities.contains_key(type_name)
    }

    pub fn has_value_object(&self, type_name: &str) -> bool {
        self.value_objects.contains_key(type_name)
    }

    /// Registered entity type names, sorted.
    pub fn entity_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entities.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl core::fmt::Debug for DomainFactoryBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut entities: Vec<_> = self.entities.keys().copied().collect();
        entities.sort_unstable();
        let mut value_objects: Vec<_> = self.value_objects.keys().copied().collect();
        value_objects.sort_unstable();
        f.debug_struct("DomainFactoryBuilder")
            .field("entities", &entities)
            .field("value_objects", &value_objects)
            .finish()
    }
}

impl core::fmt::Debug for DomainFactory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut value_objects: Vec<_> = self.value_objects.keys().copied().collect();
        value_objects.sort_unstable();
        f.debug_struct("DomainFactory")
            .field("entities", &self.entity_types())
            .field("value_objects", &value_objects)
            .finish()
    }
}

fn downcast<T: 'static>(type_name: &str, value: Box<dyn Any + Send>) -> Result<T, FactoryError> {
    value
        .downcast::<T>()
        .map(|v| *v)
        .map_err(|_| FactoryError::TypeMismatch {
            type_name: type_name.to_string(),
            expected: std::any::type_name::<T>(),
        })
}
