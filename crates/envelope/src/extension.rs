use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Extension carrying the id that ties related events together.
pub const CORRELATION_ID: &str = "correlationid";

/// Extension carrying the id of the actor that caused the event.
pub const ACTOR_ID: &str = "actorid";

/// Extension carrying the display name of the actor that caused the event.
pub const ACTOR_NAME: &str = "actorname";

/// A typed extension attribute value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionValue {
    /// Boolean attribute.
    Bool(bool),

    /// Integer attribute.
    Integer(i64),

    /// String attribute.
    String(String),
}

impl ExtensionValue {
    /// Returns the value as a string slice when it is a string attribute.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn from_json(name: &str, value: serde_json::Value) -> Result<Self, Error> {
        match value {
            serde_json::Value::Bool(b) => Ok(Self::Bool(b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .ok_or_else(|| Error::InvalidExtensionValue(name.to_string())),
            serde_json::Value::String(s) => Ok(Self::String(s)),
            _ => Err(Error::InvalidExtensionValue(name.to_string())),
        }
    }
}

impl fmt::Display for ExtensionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for ExtensionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ExtensionValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<String> for ExtensionValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for ExtensionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Extension names are 1-20 lowercase ASCII letters or digits.
pub(crate) fn validate_extension_name(name: &str) -> Result<(), Error> {
    let valid = !name.is_empty()
        && name.len() <= 20
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidExtensionName(name.to_string()))
    }
}
