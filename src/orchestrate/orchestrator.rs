// ABOUTME: Phase-by-phase run driver: start units, poll probes, roll back.
// ABOUTME: Parallel within a phase, strictly serialized across phases.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::error::OrchestrateError;
use super::handle::{LedgerHandle, compose_unit_env};
use super::rollback::roll_back;
use crate::config::{StackConfig, resolve_env_map};
use crate::graph::{ServiceGraph, ServiceUnit, UnitState};
use crate::hooks::{HookContext, HookPoint, HookRunner};
use crate::ledger::{DeploymentRun, FailedUnit, LedgerStore, RunLock, RunStatus};
use crate::ports::{PortAllocator, PortScan, TcpBindScan};
use crate::probe::{HealthProbe, ProbeOutcome};
use crate::runtime::ServiceRuntime;

/// Requests cancellation of a run in flight. Probe loops stop at their
/// next wakeup, the run fails, and rollback is triggered.
#[derive(Debug, Clone)]
pub struct AbortHandle(Arc<watch::Sender<bool>>);

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.0.send(true);
    }
}

/// Walks the service graph phase by phase against an injected runtime.
///
/// Holds the stack's run lock for the duration of a run; concurrent reruns
/// of the same stack are rejected, not raced.
pub struct Orchestrator<R> {
    runtime: R,
    store: LedgerStore,
    scan: Box<dyn PortScan + Send + Sync>,
    hooks: Option<HookRunner>,
    abort_tx: Arc<watch::Sender<bool>>,
}

impl<R: ServiceRuntime> Orchestrator<R> {
    pub fn new(runtime: R, store: LedgerStore) -> Self {
        let (abort_tx, _) = watch::channel(false);
        Self {
            runtime,
            store,
            scan: Box::new(TcpBindScan),
            hooks: None,
            abort_tx: Arc::new(abort_tx),
        }
    }

    /// Replace the live port scan, used by tests to fake bound ports.
    pub fn with_port_scan(mut self, scan: Box<dyn PortScan + Send + Sync>) -> Self {
        self.scan = scan;
        self
    }

    /// Enable lifecycle hooks discovered under the given project directory.
    pub fn with_hooks(mut self, hooks: HookRunner) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(Arc::clone(&self.abort_tx))
    }

    /// Execute one run of the stack, resuming from the last persisted run.
    ///
    /// Units recorded healthy by the previous run are not started again;
    /// a rerun of an already-succeeded stack performs zero start actions.
    ///
    /// The returned record carries the final status (`Succeeded`,
    /// `Failed`, or `RolledBack`); unit-level failures are reported there,
    /// not as errors. `Err` means the run never got past pre-flight:
    /// bad graph, exhausted ports, unresolvable environment, a rejected
    /// pre-run gate, or a held lock.
    pub async fn run(
        &self,
        config: &StackConfig,
        force_lock: bool,
    ) -> Result<DeploymentRun, OrchestrateError> {
        let graph = ServiceGraph::from_config(config)?;
        let env =
            resolve_env_map(&config.env).map_err(|e| OrchestrateError::Env(e.to_string()))?;

        let lock = RunLock::acquire(self.store.dir(), &config.stack, force_lock)?;
        let result = self.run_locked(config, &graph, &env).await;
        lock.release();
        result
    }

    async fn run_locked(
        &self,
        config: &StackConfig,
        graph: &ServiceGraph,
        env: &HashMap<String, String>,
    ) -> Result<DeploymentRun, OrchestrateError> {
        self.pre_run_gate(config).await?;

        let prior = self.store.load(&config.stack)?;
        let mut run = DeploymentRun::new(config.stack.clone(), config.profile, graph);

        // Resume: carry over healthy units and the ports they hold.
        let mut preassigned: BTreeSet<u16> = BTreeSet::new();
        if let Some(prior) = prior {
            for unit in prior.healthy_units() {
                if run.unit_states.contains_key(unit) {
                    run.set_state(unit, UnitState::Healthy);
                    for mapping in prior.mappings_for(unit) {
                        preassigned.insert(mapping.assigned_host_port);
                        run.port_mappings.push(mapping);
                    }
                }
            }
        }

        let declared: Vec<_> = graph
            .declared_ports()
            .into_iter()
            .filter(|(unit, _)| run.state(unit) != Some(UnitState::Healthy))
            .collect();
        let fallback = config.profile.fallback_ports(&config.ports.range);
        let allocator = PortAllocator::new(self.scan.as_ref(), fallback);
        let mappings = allocator.allocate(declared, &preassigned)?;
        run.port_mappings.extend(mappings);

        let run_id = run.run_id.clone();
        let handle = LedgerHandle::new(run, &self.store);
        handle.persist()?;

        for phase in graph.phases() {
            let pending: Vec<&ServiceUnit> = phase
                .units
                .iter()
                .filter_map(|name| graph.unit(name))
                .filter(|unit| handle.state(&unit.name) != Some(UnitState::Healthy))
                .collect();

            if pending.is_empty() {
                tracing::info!(phase = phase.index, "phase already healthy, skipping");
                continue;
            }

            tracing::info!(phase = phase.index, units = pending.len(), "entering phase");

            let outcomes = futures::future::join_all(
                pending.iter().map(|unit| self.run_unit(unit, &handle, env)),
            )
            .await;

            let failures: Vec<FailedUnit> = outcomes.into_iter().flatten().collect();

            if !failures.is_empty() {
                for failure in &failures {
                    tracing::error!(unit = %failure.unit, reason = %failure.reason, "unit failed");
                }
                handle.update(|run| {
                    run.status = RunStatus::Failed;
                    run.failed_units = failures;
                })?;

                let report = roll_back(&self.runtime, graph, &handle, env).await;
                handle.update(|run| {
                    run.status = RunStatus::RolledBack;
                    run.rollback_failures = report.failures;
                })?;

                self.run_hook(
                    config,
                    HookPoint::OnFailure,
                    Some(&run_id),
                    Some(RunStatus::RolledBack),
                )
                .await;
                return Ok(handle.snapshot());
            }

            // Phase boundary: the next phase must not start before this
            // write is durable.
            handle.persist()?;
            tracing::info!(phase = phase.index, "phase healthy");
        }

        handle.update(|run| run.status = RunStatus::Succeeded)?;
        self.run_hook(
            config,
            HookPoint::PostRun,
            Some(&run_id),
            Some(RunStatus::Succeeded),
        )
        .await;
        Ok(handle.snapshot())
    }

    /// Drive one unit to a terminal state. Returns the failure, if any.
    async fn run_unit(
        &self,
        unit: &ServiceUnit,
        handle: &LedgerHandle<'_>,
        env: &HashMap<String, String>,
    ) -> Option<FailedUnit> {
        let mut abort = self.abort_tx.subscribe();

        if *abort.borrow() {
            // Aborted before the start action was issued; nothing to undo.
            return Some(FailedUnit {
                unit: unit.name.clone(),
                reason: "aborted before start".to_string(),
            });
        }

        let unit_env = compose_unit_env(&unit.name, env, &handle.mappings_for(&unit.name));

        handle.transition(&unit.name, UnitState::Starting);
        if let Err(e) = self
            .runtime
            .start_unit(&unit.name, &unit.start_action, &unit_env)
            .await
        {
            // A failed start is not expected to self-heal; no probe
            // attempts are wasted on it.
            handle.transition(&unit.name, UnitState::Failed);
            return Some(FailedUnit {
                unit: unit.name.clone(),
                reason: format!("start action failed: {e}"),
            });
        }

        handle.transition(&unit.name, UnitState::HealthChecking);

        let Some(probe_config) = &unit.probe else {
            handle.transition(&unit.name, UnitState::Healthy);
            return None;
        };

        let probe =
            HealthProbe::from_config_with_ports(probe_config, &handle.mappings_for(&unit.name));

        if !probe_config.start_period.is_zero()
            && sleep_or_abort(probe_config.start_period, &mut abort).await
        {
            handle.transition(&unit.name, UnitState::Unhealthy);
            return Some(FailedUnit {
                unit: unit.name.clone(),
                reason: "aborted before first probe".to_string(),
            });
        }

        let attempts = probe_config.retries.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            match probe.check().await {
                ProbeOutcome::Pass => {
                    tracing::info!(unit = %unit.name, attempt, "probe passed");
                    handle.transition(&unit.name, UnitState::Healthy);
                    return None;
                }
                ProbeOutcome::Fail(reason) => {
                    tracing::debug!(
                        unit = %unit.name,
                        attempt,
                        attempts,
                        %reason,
                        "probe failed"
                    );
                    last_reason = reason;
                }
            }

            if attempt < attempts && sleep_or_abort(probe_config.delay, &mut abort).await {
                last_reason = "aborted while waiting between probes".to_string();
                break;
            }
        }

        handle.transition(&unit.name, UnitState::Unhealthy);
        Some(FailedUnit {
            unit: unit.name.clone(),
            reason: last_reason,
        })
    }

    /// Run the pre-run gate hook. A pre-deployment snapshot failure must
    /// stop the run before it has any side effects.
    async fn pre_run_gate(&self, config: &StackConfig) -> Result<(), OrchestrateError> {
        let Some(result) = self
            .run_hook_inner(config, HookPoint::PreRun, None, None)
            .await
        else {
            return Ok(());
        };

        if result.success {
            Ok(())
        } else {
            let detail = if result.stderr.trim().is_empty() {
                format!("exit code {:?}", result.exit_code)
            } else {
                result.stderr.trim().to_string()
            };
            Err(OrchestrateError::PreRunGate(detail))
        }
    }

    async fn run_hook(
        &self,
        config: &StackConfig,
        point: HookPoint,
        run_id: Option<&crate::types::RunId>,
        status: Option<RunStatus>,
    ) {
        let _ = self.run_hook_inner(config, point, run_id, status).await;
    }

    async fn run_hook_inner(
        &self,
        config: &StackConfig,
        point: HookPoint,
        run_id: Option<&crate::types::RunId>,
        status: Option<RunStatus>,
    ) -> Option<crate::hooks::HookResult> {
        let hooks = self.hooks.as_ref()?;
        let context = HookContext {
            stack: config.stack.clone(),
            profile: config.profile.to_string(),
            run_id: run_id.map(|id| id.to_string()),
            status: status.map(|s| s.to_string()),
        };
        hooks.run(point, &context).await
    }
}

/// Sleep, waking early on abort. Returns true if the run was aborted.
async fn sleep_or_abort(duration: Duration, abort: &mut watch::Receiver<bool>) -> bool {
    if *abort.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = abort.changed() => match changed {
            Ok(()) => *abort.borrow(),
            // Sender gone means no abort can ever arrive.
            Err(_) => {
                tokio::time::sleep(duration).await;
                false
            }
        },
    }
}

/// Stop every unit of the last recorded run and mark the run rolled back.
///
/// This is the `rollback` command: unlike the automatic unwind inside a
/// failing run, it tears down whatever the ledger says is up, including a
/// fully healthy stack.
pub async fn manual_rollback<R: ServiceRuntime>(
    runtime: &R,
    config: &StackConfig,
    store: &LedgerStore,
) -> Result<DeploymentRun, OrchestrateError> {
    let graph = ServiceGraph::from_config(config)?;
    let env = resolve_env_map(&config.env).map_err(|e| OrchestrateError::Env(e.to_string()))?;

    let lock = RunLock::acquire(store.dir(), &config.stack, false)?;

    let result = async {
        let Some(run) = store.load(&config.stack)? else {
            return Err(OrchestrateError::NoRecordedRun(config.stack.to_string()));
        };

        let handle = LedgerHandle::new(run, store);
        let report = roll_back(runtime, &graph, &handle, &env).await;
        handle.update(|run| {
            run.status = RunStatus::RolledBack;
            run.rollback_failures.extend(report.failures);
        })?;
        Ok(handle.snapshot())
    }
    .await;

    lock.release();
    result
}
