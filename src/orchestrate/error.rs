// ABOUTME: Error taxonomy for the orchestration run.
// ABOUTME: Pre-flight errors abort before any unit starts.

use crate::graph::GraphError;
use crate::ledger::LedgerError;
use crate::ports::PortError;

/// Fatal errors surfaced by the orchestrator.
///
/// Unit-level failures (unhealthy probes, start action errors) are not
/// errors here: they resolve into a `Failed`/`RolledBack` run record. This
/// enum covers what prevents a run from getting that far.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrateError {
    /// Graph construction failed; no unit was started.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Port allocation failed; no unit was started.
    #[error(transparent)]
    Port(#[from] PortError),

    /// Ledger, lock, or persistence failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A referenced environment value could not be resolved.
    #[error("environment resolution failed: {0}")]
    Env(String),

    /// The pre-run snapshot gate rejected the run.
    #[error("pre-run gate failed: {0}")]
    PreRunGate(String),

    /// No run record exists for the requested operation.
    #[error("no recorded run for stack '{0}'")]
    NoRecordedRun(String),
}
