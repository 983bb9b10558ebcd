// ABOUTME: Port conflict detection and conflict-free remapping.
// ABOUTME: Produces a PortMapping per declared port before any unit starts.

use crate::types::UnitName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// A declared port pair, written "HOST:CONTAINER" in the stack file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub preferred_host: u16,
    pub container: u16,
}

impl std::str::FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, container) = s
            .split_once(':')
            .ok_or_else(|| format!("expected HOST:CONTAINER, got '{s}'"))?;
        let preferred_host: u16 = host
            .trim()
            .parse()
            .map_err(|_| format!("invalid host port '{host}'"))?;
        let container: u16 = container
            .trim()
            .parse()
            .map_err(|_| format!("invalid container port '{container}'"))?;
        Ok(Self {
            preferred_host,
            container,
        })
    }
}

/// Why a declared port ended up on its assigned host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MapReason {
    /// Preferred port was free and unclaimed.
    Unchanged,
    /// Preferred port was bound by a non-managed process.
    RemappedSystemConflict,
    /// Preferred port was claimed by an earlier declaration this run.
    RemappedDeclaredConflict,
}

/// The resolved assignment for one declared port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub unit: UnitName,
    pub container_port: u16,
    pub requested_host_port: u16,
    pub assigned_host_port: u16,
    pub reason: MapReason,
}

#[derive(Debug, Error)]
pub enum PortError {
    /// Fatal: indicates misconfiguration, never retried.
    #[error("no free host port for unit '{unit}' container port {container_port}")]
    Exhaustion {
        unit: UnitName,
        container_port: u16,
    },
}

/// Answers whether a host port is currently bindable.
///
/// Injected so the allocator is testable without touching real sockets.
pub trait PortScan {
    fn is_free(&self, port: u16) -> bool;
}

/// Live scan: a port is free if we can bind it on the loopback interface.
/// The listener is dropped immediately; the actual bind happens when the
/// unit starts.
pub struct TcpBindScan;

impl PortScan for TcpBindScan {
    fn is_free(&self, port: u16) -> bool {
        std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
    }
}

/// Computes a conflict-free host port assignment for a full declaration set.
///
/// Never binds anything itself; it only records what the units should bind.
pub struct PortAllocator<'a> {
    scan: &'a dyn PortScan,
    fallback: Vec<u16>,
}

impl<'a> PortAllocator<'a> {
    pub fn new(scan: &'a dyn PortScan, fallback: Vec<u16>) -> Self {
        Self { scan, fallback }
    }

    /// Assign a host port to every declared `(unit, spec)` pair.
    ///
    /// `preassigned` holds ports already in use by resumed healthy units;
    /// they count as claimed so new assignments cannot collide with them.
    ///
    /// Declarations are processed in ascending preferred-port order so the
    /// output is deterministic for a given scan result.
    ///
    /// # Errors
    ///
    /// Returns `PortError::Exhaustion` when neither the preferred port nor
    /// any fallback candidate is free for a declaration.
    pub fn allocate(
        &self,
        mut declared: Vec<(UnitName, PortSpec)>,
        preassigned: &BTreeSet<u16>,
    ) -> Result<Vec<PortMapping>, PortError> {
        declared.sort_by(|a, b| {
            (a.1.preferred_host, &a.0, a.1.container).cmp(&(
                b.1.preferred_host,
                &b.0,
                b.1.container,
            ))
        });

        let mut claimed: BTreeSet<u16> = preassigned.clone();
        let mut mappings = Vec::with_capacity(declared.len());

        for (unit, spec) in declared {
            let preferred = spec.preferred_host;

            if !claimed.contains(&preferred) && self.scan.is_free(preferred) {
                claimed.insert(preferred);
                mappings.push(PortMapping {
                    unit,
                    container_port: spec.container,
                    requested_host_port: preferred,
                    assigned_host_port: preferred,
                    reason: MapReason::Unchanged,
                });
                continue;
            }

            let reason = if claimed.contains(&preferred) {
                MapReason::RemappedDeclaredConflict
            } else {
                MapReason::RemappedSystemConflict
            };

            let assigned = self
                .fallback
                .iter()
                .copied()
                .find(|p| !claimed.contains(p) && self.scan.is_free(*p));

            match assigned {
                Some(port) => {
                    tracing::info!(
                        unit = %unit,
                        requested = preferred,
                        assigned = port,
                        ?reason,
                        "remapped conflicting port"
                    );
                    claimed.insert(port);
                    mappings.push(PortMapping {
                        unit,
                        container_port: spec.container,
                        requested_host_port: preferred,
                        assigned_host_port: port,
                        reason,
                    });
                }
                None => {
                    return Err(PortError::Exhaustion {
                        unit,
                        container_port: spec.container,
                    });
                }
            }
        }

        Ok(mappings)
    }
}
