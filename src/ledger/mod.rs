// ABOUTME: Persisted record of the current/last deployment run per stack.
// ABOUTME: Written atomically so a crash mid-run leaves a resumable record.

mod lock;

pub use lock::{LockInfo, RunLock};

use crate::config::Profile;
use crate::graph::{ServiceGraph, UnitState};
use crate::ports::PortMapping;
use crate::types::{RunId, StackName, UnitName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Status of one end-to-end execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    InProgress,
    Succeeded,
    Failed,
    RolledBack,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::InProgress => "in-progress",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::RolledBack => "rolled-back",
        };
        write!(f, "{s}")
    }
}

/// A unit that caused run failure, with its last observed failure reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedUnit {
    pub unit: UnitName,
    pub reason: String,
}

/// A stop action that failed during best-effort rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackFailure {
    pub unit: UnitName,
    pub reason: String,
}

/// The full machine-readable record of one deployment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub run_id: RunId,
    pub stack: StackName,
    pub started_at: DateTime<Utc>,
    pub profile: Profile,
    pub status: RunStatus,
    pub unit_states: BTreeMap<UnitName, UnitState>,
    pub port_mappings: Vec<PortMapping>,

    /// Which unit(s) caused a failed run, never a bare "deployment failed".
    #[serde(default)]
    pub failed_units: Vec<FailedUnit>,

    /// Partial rollback is surfaced here rather than escalated.
    #[serde(default)]
    pub rollback_failures: Vec<RollbackFailure>,
}

impl DeploymentRun {
    /// Fresh run with every unit of the graph pending.
    pub fn new(stack: StackName, profile: Profile, graph: &ServiceGraph) -> Self {
        let unit_states = graph
            .units()
            .map(|u| (u.name.clone(), UnitState::Pending))
            .collect();
        Self {
            run_id: RunId::generate(),
            stack,
            started_at: Utc::now(),
            profile,
            status: RunStatus::InProgress,
            unit_states,
            port_mappings: Vec::new(),
            failed_units: Vec::new(),
            rollback_failures: Vec::new(),
        }
    }

    pub fn state(&self, unit: &UnitName) -> Option<UnitState> {
        self.unit_states.get(unit).copied()
    }

    pub fn set_state(&mut self, unit: &UnitName, state: UnitState) {
        self.unit_states.insert(unit.clone(), state);
    }

    /// Units recorded healthy, used to skip start actions on rerun.
    pub fn healthy_units(&self) -> impl Iterator<Item = &UnitName> {
        self.unit_states
            .iter()
            .filter(|(_, s)| **s == UnitState::Healthy)
            .map(|(n, _)| n)
    }

    /// Port mappings belonging to one unit.
    pub fn mappings_for(&self, unit: &UnitName) -> Vec<PortMapping> {
        self.port_mappings
            .iter()
            .filter(|m| &m.unit == unit)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("run already in progress: lock held by {holder} (pid {pid}) since {started_at}")]
    LockHeld {
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
    },

    #[error("lock error: {0}")]
    Lock(String),
}

/// Reads and writes the per-stack run record under a state directory.
///
/// Every write goes to a temp file first and is renamed into place, so a
/// reader never observes a partially written record.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    dir: PathBuf,
}

impl LedgerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, stack: &StackName) -> PathBuf {
        self.dir.join(format!("{stack}.json"))
    }

    /// Load the last persisted run for a stack, if any.
    pub fn load(&self, stack: &StackName) -> Result<Option<DeploymentRun>, LedgerError> {
        let path = self.record_path(stack);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let run = serde_json::from_str(&content)?;
        Ok(Some(run))
    }

    /// Persist a run record atomically (write-to-temp-then-rename).
    pub fn save(&self, run: &DeploymentRun) -> Result<(), LedgerError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.record_path(&run.stack);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(run)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}
