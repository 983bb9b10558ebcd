// ABOUTME: Validated stack name used to key ledger files and locks.
// ABOUTME: Same character set as unit names so it is safe in file paths.

use super::unit_name::UnitNameError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Name of a logical deployment target (one stack = one ledger).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackName(String);

impl StackName {
    pub fn new(value: &str) -> Result<Self, UnitNameError> {
        // Identical validation rules; a stack name must be usable as a
        // filename component without escaping.
        super::UnitName::new(value).map(|n| Self(n.as_str().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for StackName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StackName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        StackName::new(&value).map_err(serde::de::Error::custom)
    }
}
