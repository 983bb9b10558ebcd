// ABOUTME: Service unit model and dependency graph layered into phases.
// ABOUTME: Phase members have no edges among them and start concurrently.

use crate::config::{ProbeConfig, StackConfig};
use crate::ports::PortSpec;
use crate::types::{ActionRef, UnitName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Lifecycle state of a single unit within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    Pending,
    Starting,
    HealthChecking,
    Healthy,
    Unhealthy,
    Failed,
    RolledBack,
}

impl UnitState {
    /// Whether the start action was invoked for a unit in this state.
    pub fn reached_start(&self) -> bool {
        !matches!(self, UnitState::Pending | UnitState::RolledBack)
    }

    /// Whether rollback should invoke the stop action. Anything that had
    /// its start action invoked gets a best-effort stop, including units
    /// whose start errored (partial side effects are possible).
    pub fn needs_stop(&self) -> bool {
        self.reached_start()
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitState::Pending => "pending",
            UnitState::Starting => "starting",
            UnitState::HealthChecking => "health-checking",
            UnitState::Healthy => "healthy",
            UnitState::Unhealthy => "unhealthy",
            UnitState::Failed => "failed",
            UnitState::RolledBack => "rolled-back",
        };
        write!(f, "{s}")
    }
}

/// The atomic controllable entity: name, dependencies, ports, actions, probe.
#[derive(Debug, Clone)]
pub struct ServiceUnit {
    pub name: UnitName,
    pub depends_on: BTreeSet<UnitName>,
    pub declared_ports: Vec<PortSpec>,
    pub start_action: ActionRef,
    pub stop_action: ActionRef,
    pub probe: Option<ProbeConfig>,
}

/// One scheduling step: units with no dependency edges among them.
#[derive(Debug, Clone)]
pub struct Phase {
    pub index: usize,
    pub units: Vec<UnitName>,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate unit name: {0}")]
    DuplicateUnit(UnitName),

    #[error("unit '{unit}' depends on undeclared unit '{dependency}'")]
    UnknownDependency {
        unit: UnitName,
        dependency: UnitName,
    },

    #[error("dependency cycle among units: {}", join_names(.0))]
    CyclicDependency(Vec<UnitName>),
}

fn join_names(names: &[UnitName]) -> String {
    names
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A DAG of service units grouped into ordered phases.
#[derive(Debug, Clone)]
pub struct ServiceGraph {
    units: BTreeMap<UnitName, ServiceUnit>,
    phases: Vec<Phase>,
}

impl ServiceGraph {
    /// Layer units into phases by iterative topological sort.
    ///
    /// Repeatedly collects every unit whose dependencies are all placed in
    /// earlier phases. If a pass places nothing while units remain, the
    /// remainder forms a cycle and the build fails naming those units.
    ///
    /// # Errors
    ///
    /// `DuplicateUnit`, `UnknownDependency`, or `CyclicDependency`.
    pub fn build(declared: Vec<ServiceUnit>) -> Result<Self, GraphError> {
        let mut units: BTreeMap<UnitName, ServiceUnit> = BTreeMap::new();
        for unit in declared {
            if units.contains_key(&unit.name) {
                return Err(GraphError::DuplicateUnit(unit.name));
            }
            units.insert(unit.name.clone(), unit);
        }

        for unit in units.values() {
            for dep in &unit.depends_on {
                if !units.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        unit: unit.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut placed: BTreeSet<UnitName> = BTreeSet::new();
        let mut phases: Vec<Phase> = Vec::new();

        while placed.len() < units.len() {
            let ready: Vec<UnitName> = units
                .values()
                .filter(|u| !placed.contains(&u.name))
                .filter(|u| u.depends_on.iter().all(|d| placed.contains(d)))
                .map(|u| u.name.clone())
                .collect();

            if ready.is_empty() {
                let stuck: Vec<UnitName> = units
                    .keys()
                    .filter(|n| !placed.contains(*n))
                    .cloned()
                    .collect();
                return Err(GraphError::CyclicDependency(stuck));
            }

            placed.extend(ready.iter().cloned());
            phases.push(Phase {
                index: phases.len(),
                units: ready,
            });
        }

        Ok(Self { units, phases })
    }

    pub fn from_config(config: &StackConfig) -> Result<Self, GraphError> {
        let declared = config
            .units
            .iter()
            .map(|(name, unit)| ServiceUnit {
                name: name.clone(),
                depends_on: unit.depends_on.clone(),
                declared_ports: unit.ports.clone(),
                start_action: unit.start.clone(),
                stop_action: unit.stop.clone(),
                probe: unit.probe.clone(),
            })
            .collect();
        Self::build(declared)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn unit(&self, name: &UnitName) -> Option<&ServiceUnit> {
        self.units.get(name)
    }

    pub fn units(&self) -> impl Iterator<Item = &ServiceUnit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Phase index of a unit. Every built graph places every unit.
    pub fn phase_of(&self, name: &UnitName) -> Option<usize> {
        self.phases
            .iter()
            .find(|p| p.units.contains(name))
            .map(|p| p.index)
    }

    /// All declared `(unit, port)` pairs, input to the port allocator.
    pub fn declared_ports(&self) -> Vec<(UnitName, PortSpec)> {
        self.units
            .values()
            .flat_map(|u| {
                u.declared_ports
                    .iter()
                    .map(move |spec| (u.name.clone(), *spec))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, deps: &[&str]) -> ServiceUnit {
        ServiceUnit {
            name: UnitName::new(name).unwrap(),
            depends_on: deps.iter().map(|d| UnitName::new(d).unwrap()).collect(),
            declared_ports: vec![],
            start_action: ActionRef::new(format!("start {name}")),
            stop_action: ActionRef::new(format!("stop {name}")),
            probe: None,
        }
    }

    #[test]
    fn independent_units_share_one_phase() {
        let graph = ServiceGraph::build(vec![unit("a", &[]), unit("b", &[])]).unwrap();
        assert_eq!(graph.phases().len(), 1);
        assert_eq!(graph.phases()[0].units.len(), 2);
    }

    #[test]
    fn chain_produces_one_phase_per_unit() {
        let graph =
            ServiceGraph::build(vec![unit("a", &[]), unit("b", &["a"]), unit("c", &["b"])])
                .unwrap();
        assert_eq!(graph.phases().len(), 3);
        assert_eq!(graph.phase_of(&UnitName::new("a").unwrap()), Some(0));
        assert_eq!(graph.phase_of(&UnitName::new("c").unwrap()), Some(2));
    }

    #[test]
    fn cycle_is_rejected_naming_members() {
        let err = ServiceGraph::build(vec![unit("a", &["b"]), unit("b", &["a"])]).unwrap_err();
        match err {
            GraphError::CyclicDependency(names) => {
                assert_eq!(names.len(), 2);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = ServiceGraph::build(vec![unit("a", &["a"])]).unwrap_err();
        assert!(matches!(err, GraphError::CyclicDependency(_)));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = ServiceGraph::build(vec![unit("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }

    #[test]
    fn diamond_places_join_after_both_branches() {
        let graph = ServiceGraph::build(vec![
            unit("base", &[]),
            unit("left", &["base"]),
            unit("right", &["base"]),
            unit("top", &["left", "right"]),
        ])
        .unwrap();
        assert_eq!(graph.phases().len(), 3);
        assert_eq!(graph.phases()[1].units.len(), 2);
        assert_eq!(graph.phase_of(&UnitName::new("top").unwrap()), Some(2));
    }

    #[test]
    fn states_that_reached_start() {
        assert!(!UnitState::Pending.reached_start());
        assert!(UnitState::Starting.reached_start());
        assert!(UnitState::HealthChecking.reached_start());
        assert!(UnitState::Healthy.reached_start());
        assert!(UnitState::Unhealthy.reached_start());
        assert!(UnitState::Failed.reached_start());
    }
}
