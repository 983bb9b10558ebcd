// ABOUTME: ServiceRuntime backed by local command execution.
// ABOUTME: Actions run under sh -c with the resolved environment applied.

use super::error::{ActionFailedSnafu, RuntimeError, SpawnSnafu};
use super::ServiceRuntime;
use crate::types::{ActionRef, UnitName};
use async_trait::async_trait;
use snafu::ResultExt;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;

/// Runs unit actions as local shell commands.
///
/// An action is expected to issue the start/stop and return promptly (e.g.
/// `docker compose up -d db`, `systemctl --user start db`); waiting for
/// readiness is the probe loop's job, not the action's.
#[derive(Debug, Default)]
pub struct ProcessRuntime;

impl ProcessRuntime {
    pub fn new() -> Self {
        Self
    }

    async fn run_action(
        &self,
        unit: &UnitName,
        action: &ActionRef,
        env: &HashMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(action.as_str())
            .envs(env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context(SpawnSnafu {
                action: action.as_str().to_string(),
            })?;

        if output.status.success() {
            tracing::debug!(unit = %unit, action = %action, "action completed");
            Ok(())
        } else {
            ActionFailedSnafu {
                action: action.as_str().to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .fail()
        }
    }
}

#[async_trait]
impl ServiceRuntime for ProcessRuntime {
    async fn start_unit(
        &self,
        unit: &UnitName,
        action: &ActionRef,
        env: &HashMap<String, String>,
    ) -> Result<(), RuntimeError> {
        tracing::info!(unit = %unit, "invoking start action");
        self.run_action(unit, action, env).await
    }

    async fn stop_unit(
        &self,
        unit: &UnitName,
        action: &ActionRef,
        env: &HashMap<String, String>,
    ) -> Result<(), RuntimeError> {
        tracing::info!(unit = %unit, "invoking stop action");
        self.run_action(unit, action, env).await
    }
}
