// ABOUTME: Environment profile selection for port remapping policy.
// ABOUTME: Dev remaps into a private range, prod only onto 80/443.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hardware/environment variant the stack is deployed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Dev,
    Prod,
}

impl Profile {
    /// Candidate host ports for remapping a conflicted declaration.
    ///
    /// Production deliberately gets no private fallback range: if neither
    /// 80 nor 443 is free, the machine is misconfigured and the run must
    /// abort rather than bind an unexpected port.
    pub fn fallback_ports(&self, range: &PortRange) -> Vec<u16> {
        match self {
            Profile::Dev => range.iter().collect(),
            Profile::Prod => vec![80, 443],
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Dev => write!(f, "dev"),
            Profile::Prod => write!(f, "prod"),
        }
    }
}

/// Inclusive host port range, written as "8000-8999" in the stack file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 8000,
            end: 8999,
        }
    }
}

impl std::str::FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("expected START-END, got '{s}'"))?;
        let start: u16 = start
            .trim()
            .parse()
            .map_err(|_| format!("invalid range start '{start}'"))?;
        let end: u16 = end
            .trim()
            .parse()
            .map_err(|_| format!("invalid range end '{end}'"))?;
        PortRange::new(start, end).ok_or_else(|| format!("range start {start} exceeds end {end}"))
    }
}

impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
