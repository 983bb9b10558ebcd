// ABOUTME: Abstract start/stop seam between the orchestrator and the world.
// ABOUTME: How units are actually built and run is behind this trait.

mod error;
mod process;

pub use error::{RuntimeError, RuntimeErrorKind};
pub use process::ProcessRuntime;

use crate::types::{ActionRef, UnitName};
use async_trait::async_trait;
use std::collections::HashMap;

/// Issues start/stop commands against named service units.
///
/// The orchestrator never shells out directly; everything it does to the
/// outside world goes through this trait, which keeps the phase scheduler
/// testable without real process execution.
#[async_trait]
pub trait ServiceRuntime: Send + Sync {
    /// Invoke the unit's start action. Returning `Ok` means the command was
    /// issued and accepted; readiness is the health probe's concern.
    async fn start_unit(
        &self,
        unit: &UnitName,
        action: &ActionRef,
        env: &HashMap<String, String>,
    ) -> Result<(), RuntimeError>;

    /// Invoke the unit's stop action.
    async fn stop_unit(
        &self,
        unit: &UnitName,
        action: &ActionRef,
        env: &HashMap<String, String>,
    ) -> Result<(), RuntimeError>;
}
