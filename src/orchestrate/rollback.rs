// ABOUTME: Best-effort teardown of units started in a failing run.
// ABOUTME: Later phases stop first; stop failures are recorded, never fatal.

use super::handle::{LedgerHandle, compose_unit_env};
use crate::graph::{ServiceGraph, UnitState};
use crate::ledger::RollbackFailure;
use crate::runtime::ServiceRuntime;
use crate::types::UnitName;
use std::collections::HashMap;

/// What a rollback pass did.
#[derive(Debug, Default)]
pub struct RollbackReport {
    pub stopped: Vec<UnitName>,
    pub failures: Vec<RollbackFailure>,
}

/// Unwind a failed run: stop every unit that had its start action invoked,
/// in reverse phase order, and mark every unit `RolledBack`.
///
/// Later phases stop first since they may depend on earlier phases staying
/// briefly available during teardown. Units still `Pending` need no stop
/// action. A failing stop action is logged and recorded; the pass always
/// continues, because rollback runs in an already-failing context and must
/// not itself escalate.
pub(crate) async fn roll_back<R: ServiceRuntime>(
    runtime: &R,
    graph: &ServiceGraph,
    handle: &LedgerHandle<'_>,
    env: &HashMap<String, String>,
) -> RollbackReport {
    let mut report = RollbackReport::default();

    for phase in graph.phases().iter().rev() {
        for name in &phase.units {
            let Some(state) = handle.state(name) else {
                continue;
            };
            if state == UnitState::RolledBack {
                continue;
            }

            if state.needs_stop() {
                let Some(unit) = graph.unit(name) else {
                    continue;
                };
                let unit_env = compose_unit_env(name, env, &handle.mappings_for(name));
                tracing::info!(unit = %name, phase = phase.index, "rolling back unit");
                match runtime.stop_unit(name, &unit.stop_action, &unit_env).await {
                    Ok(()) => report.stopped.push(name.clone()),
                    Err(e) => {
                        tracing::warn!(unit = %name, "stop action failed during rollback: {e}");
                        report.failures.push(RollbackFailure {
                            unit: name.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            handle.transition(name, UnitState::RolledBack);
        }
    }

    report
}
