use serde::{Deserialize, Serialize};

use fleetstream_core::{DomainError, FactoryError, ValueObject, ValueObjectFactory};

/// Licence plate (value object).
///
/// Normalized to upper case; 2 to 10 characters of `A-Z`, `0-9` or `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Plate(String);

impl Plate {
    pub fn parse(value: impl AsRef<str>) -> Result<Self, DomainError> {
        let normalized = value.as_ref().trim().to_ascii_uppercase();
        if !(2..=10).contains(&normalized.len()) {
            return Err(DomainError::validation(format!(
                "plate '{normalized}' must be 2 to 10 characters"
            )));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(DomainError::validation(format!(
                "plate '{normalized}' may only contain letters, digits and '-'"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Plate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Plate {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Plate> for String {
    fn from(value: Plate) -> Self {
        value.0
    }
}

impl ValueObject for Plate {}

impl ValueObjectFactory for Plate {
    const TYPE_NAME: &'static str = "fleet.plate";

    fn from_persisted(value: &str) -> Result<Self, FactoryError> {
        Self::parse(value).map_err(|e| FactoryError::invalid_value(Self::TYPE_NAME, e.to_string()))
    }
}
