// ABOUTME: Shared in-memory run record with write-through persistence.
// ABOUTME: Unit tasks transition through here; every transition hits the ledger.

use crate::graph::UnitState;
use crate::ledger::{DeploymentRun, LedgerError, LedgerStore};
use crate::ports::PortMapping;
use crate::types::UnitName;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The single mutable view of the current run, shared by concurrent unit
/// tasks within a phase. The lock is held across the ledger write so the
/// file on disk never lags behind a later snapshot.
pub(crate) struct LedgerHandle<'a> {
    run: Mutex<DeploymentRun>,
    store: &'a LedgerStore,
}

impl<'a> LedgerHandle<'a> {
    pub(crate) fn new(run: DeploymentRun, store: &'a LedgerStore) -> Self {
        Self {
            run: Mutex::new(run),
            store,
        }
    }

    pub(crate) fn state(&self, unit: &UnitName) -> Option<UnitState> {
        self.run.lock().state(unit)
    }

    /// Record a unit transition and persist it.
    ///
    /// Persistence failures here are logged, not escalated: the in-memory
    /// run stays authoritative and the phase-boundary write is the hard
    /// durability barrier.
    pub(crate) fn transition(&self, unit: &UnitName, state: UnitState) {
        let mut run = self.run.lock();
        run.set_state(unit, state);
        tracing::info!(unit = %unit, state = %state, "unit transition");
        if let Err(e) = self.store.save(&run) {
            tracing::warn!(unit = %unit, "ledger write failed: {e}");
        }
    }

    /// Mutate the run record and persist, failing on write errors.
    /// Used for status changes and the phase-boundary barrier.
    pub(crate) fn update(
        &self,
        f: impl FnOnce(&mut DeploymentRun),
    ) -> Result<(), LedgerError> {
        let mut run = self.run.lock();
        f(&mut run);
        self.store.save(&run)
    }

    /// Write the current record out, failing on write errors. This is the
    /// durability barrier at phase boundaries.
    pub(crate) fn persist(&self) -> Result<(), LedgerError> {
        let run = self.run.lock();
        self.store.save(&run)
    }

    pub(crate) fn mappings_for(&self, unit: &UnitName) -> Vec<PortMapping> {
        self.run.lock().mappings_for(unit)
    }

    pub(crate) fn snapshot(&self) -> DeploymentRun {
        self.run.lock().clone()
    }
}

/// Environment handed to a unit's actions: the resolved stack environment
/// plus the unit's identity and final port assignment. Remapped ports reach
/// the opaque actions as `FLOTILLA_PORT_<container>` variables.
pub(crate) fn compose_unit_env(
    unit: &UnitName,
    base: &HashMap<String, String>,
    mappings: &[PortMapping],
) -> HashMap<String, String> {
    let mut env = base.clone();
    env.insert("FLOTILLA_UNIT".to_string(), unit.to_string());
    for mapping in mappings {
        env.insert(
            format!("FLOTILLA_PORT_{}", mapping.container_port),
            mapping.assigned_host_port.to_string(),
        );
    }
    env
}
