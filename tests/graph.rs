// ABOUTME: Integration tests for graph construction and phase layering.
// ABOUTME: Includes a property test over randomly generated DAGs.

use flotilla::graph::{GraphError, ServiceGraph, ServiceUnit};
use flotilla::types::{ActionRef, UnitName};
use proptest::prelude::*;
use std::collections::BTreeSet;

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
fn every_unit_lands_in_exactly_one_phase() {
    let graph = ServiceGraph::build(vec![
        unit("db", &[]),
        unit("queue", &[]),
        unit("api", &["db", "queue"]),
        unit("web", &["api"]),
        unit("worker", &["queue"]),
    ])
    .unwrap();

    let mut seen = BTreeSet::new();
    for phase in graph.phases() {
        for name in &phase.units {
            assert!(seen.insert(name.clone()), "{name} appears twice");
        }
    }
    assert_eq!(seen.len(), graph.len());
}

#[test]
fn phase_members_have_no_edges_among_them() {
    let graph = ServiceGraph::build(vec![
        unit("db", &[]),
        unit("cache", &[]),
        unit("api", &["db", "cache"]),
        unit("worker", &["db"]),
    ])
    .unwrap();

    for phase in graph.phases() {
        let members: BTreeSet<_> = phase.units.iter().collect();
        for name in &phase.units {
            let unit = graph.unit(name).unwrap();
            for dep in &unit.depends_on {
                assert!(
                    !members.contains(dep),
                    "{name} depends on phase sibling {dep}"
                );
            }
        }
    }
}

#[test]
fn cycle_error_names_every_stuck_unit() {
    let err = ServiceGraph::build(vec![
        unit("ok", &[]),
        unit("x", &["y"]),
        unit("y", &["z"]),
        unit("z", &["x"]),
    ])
    .unwrap_err();

    match err {
        GraphError::CyclicDependency(names) => {
            let names: BTreeSet<String> = names.iter().map(|n| n.to_string()).collect();
            assert_eq!(
                names,
                ["x", "y", "z"].iter().map(|s| s.to_string()).collect()
            );
        }
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn duplicate_unit_is_rejected() {
    let err = ServiceGraph::build(vec![unit("db", &[]), unit("db", &[])]).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateUnit(_)));
}

proptest! {
    /// Property: for every dependency edge v -> u, v's phase index is
    /// strictly less than u's, over random DAGs.
    ///
    /// Acyclicity is guaranteed by construction: each unit may only
    /// depend on lower-numbered units.
    #[test]
    fn dependencies_are_always_in_earlier_phases(
        edges in proptest::collection::vec(
            (1usize..12, proptest::collection::btree_set(0usize..12, 0..4)),
            0..12,
        ),
    ) {
        let count = 12;
        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        for (target, sources) in edges {
            for source in sources {
                if source < target {
                    deps[target].insert(source);
                }
            }
        }

        let units: Vec<ServiceUnit> = (0..count)
            .map(|i| {
                let dep_names: Vec<String> =
                    deps[i].iter().map(|d| format!("unit-{d}")).collect();
                let dep_refs: Vec<&str> = dep_names.iter().map(String::as_str).collect();
                unit(&format!("unit-{i}"), &dep_refs)
            })
            .collect();

        let graph = ServiceGraph::build(units).unwrap();

        for i in 0..count {
            let unit_name = UnitName::new(&format!("unit-{i}")).unwrap();
            let unit_phase = graph.phase_of(&unit_name).unwrap();
            for d in &deps[i] {
                let dep_name = UnitName::new(&format!("unit-{d}")).unwrap();
                let dep_phase = graph.phase_of(&dep_name).unwrap();
                prop_assert!(
                    dep_phase < unit_phase,
                    "dep unit-{} (phase {}) not before unit-{} (phase {})",
                    d, dep_phase, i, unit_phase
                );
            }
        }
    }
}
