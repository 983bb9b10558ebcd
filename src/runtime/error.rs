// ABOUTME: Runtime error types with SNAFU pattern.
// ABOUTME: Distinguishes spawn failures from non-zero action exits.

use snafu::Snafu;

/// Errors from invoking a unit's start or stop action.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RuntimeError {
    #[snafu(display("failed to spawn action '{action}': {source}"))]
    Spawn {
        action: String,
        source: std::io::Error,
    },

    #[snafu(display("action '{action}' exited with {code:?}: {stderr}"))]
    ActionFailed {
        action: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// The action process could not be spawned at all.
    SpawnFailed,
    /// The action ran but reported failure.
    NonZeroExit,
}

impl RuntimeError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> RuntimeErrorKind {
        match self {
            RuntimeError::Spawn { .. } => RuntimeErrorKind::SpawnFailed,
            RuntimeError::ActionFailed { .. } => RuntimeErrorKind::NonZeroExit,
        }
    }
}
