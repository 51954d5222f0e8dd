//! Identity types for TABLET records

use crate::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of a record, and of the entity built from it.
///
/// Never empty: the check happens once, when the id is constructed or
/// deserialized, so backends never need to re-validate it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Validate and wrap a raw id.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }
        Ok(Self(id))
    }

    /// Generate a fresh random id (UUIDv4, 36 characters).
    pub fn generate() -> Self {
        Self::generate_with(IdStrategy::UuidV4)
    }

    /// Generate a fresh id using the given strategy.
    pub fn generate_with(strategy: IdStrategy) -> Self {
        let uuid = match strategy {
            IdStrategy::UuidV4 => Uuid::new_v4(),
            IdStrategy::UuidV7 => Uuid::now_v7(),
        };
        Self(uuid.hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RecordId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for RecordId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RecordId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RecordId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        RecordId::new(raw).map_err(serde::de::Error::custom)
    }
}

/// How fresh ids are generated for entities constructed without one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Random UUIDv4.
    #[default]
    UuidV4,
    /// Timestamp-sortable UUIDv7.
    UuidV7,
}

impl FromStr for IdStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uuid_v4" | "v4" => Ok(IdStrategy::UuidV4),
            "uuid_v7" | "v7" => Ok(IdStrategy::UuidV7),
            other => Err(ValidationError::InvalidValue {
                field: "id_strategy".to_string(),
                reason: format!("unknown strategy '{}'", other),
            }),
        }
    }
}
