//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an aggregate instance (e.g. `"car-1"`).
///
/// Identifiers are opaque strings: non-empty and free of whitespace, so they
/// can be embedded in stream names and storage keys without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AggregateId(String);

impl AggregateId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Validate and wrap an externally supplied identifier.
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::invalid_id("AggregateId: empty"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(DomainError::invalid_id(format!(
                "AggregateId: '{value}' contains whitespace"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AggregateId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AggregateId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AggregateId> for String {
    fn from(value: AggregateId) -> Self {
        value.0
    }
}

/// Name of one aggregate instance's event stream.
///
/// Derived from the aggregate type and identifier: `"<aggregate_type>-<id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn for_aggregate(aggregate_type: &str, aggregate_id: &AggregateId) -> Self {
        Self(format!("{aggregate_type}-{aggregate_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for StreamName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
