// ABOUTME: Deployment orchestration: phase scheduling, health gates, rollback.
// ABOUTME: Exports the Orchestrator and the manual rollback entry point.

mod error;
mod handle;
mod orchestrator;
mod rollback;

pub use error::OrchestrateError;
pub use orchestrator::{AbortHandle, Orchestrator, manual_rollback};
pub use rollback::RollbackReport;
