// ABOUTME: Shared test fixtures: recording mock runtime and fixed port scan.
// ABOUTME: Lets scheduler tests run without real process execution.

#![allow(dead_code)]

use async_trait::async_trait;
use flotilla::config::{
    PortsConfig, ProbeConfig, ProbeTarget, Profile, StackConfig, UnitConfig,
};
use flotilla::ports::PortScan;
use flotilla::runtime::{RuntimeError, ServiceRuntime};
use flotilla::types::{ActionRef, StackName, UnitName};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// One recorded runtime invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(String),
    Stop(String),
}

/// A runtime that records every action and fails on request.
#[derive(Debug, Clone, Default)]
pub struct MockRuntime {
    events: Arc<Mutex<Vec<Event>>>,
    fail_start: Arc<Mutex<HashSet<String>>>,
    fail_stop: Arc<Mutex<HashSet<String>>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the start action of the named unit fail.
    pub fn fail_start(&self, unit: &str) {
        self.fail_start.lock().insert(unit.to_string());
    }

    /// Make the stop action of the named unit fail.
    pub fn fail_stop(&self, unit: &str) {
        self.fail_stop.lock().insert(unit.to_string());
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn started_units(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Start(name) => Some(name),
                Event::Stop(_) => None,
            })
            .collect()
    }

    pub fn stopped_units(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Stop(name) => Some(name),
                Event::Start(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl ServiceRuntime for MockRuntime {
    async fn start_unit(
        &self,
        unit: &UnitName,
        _action: &ActionRef,
        _env: &HashMap<String, String>,
    ) -> Result<(), RuntimeError> {
        self.events.lock().push(Event::Start(unit.to_string()));
        if self.fail_start.lock().contains(unit.as_str()) {
            return Err(RuntimeError::ActionFailed {
                action: format!("start {unit}"),
                code: Some(1),
                stderr: "simulated start failure".to_string(),
            });
        }
        Ok(())
    }

    async fn stop_unit(
        &self,
        unit: &UnitName,
        _action: &ActionRef,
        _env: &HashMap<String, String>,
    ) -> Result<(), RuntimeError> {
        self.events.lock().push(Event::Stop(unit.to_string()));
        if self.fail_stop.lock().contains(unit.as_str()) {
            return Err(RuntimeError::ActionFailed {
                action: format!("stop {unit}"),
                code: Some(1),
                stderr: "simulated stop failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Port scan with a fixed set of busy ports.
#[derive(Debug, Default)]
pub struct FixedScan {
    busy: BTreeSet<u16>,
}

impl FixedScan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_busy(ports: &[u16]) -> Self {
        Self {
            busy: ports.iter().copied().collect(),
        }
    }
}

impl PortScan for FixedScan {
    fn is_free(&self, port: u16) -> bool {
        !self.busy.contains(&port)
    }
}

/// A probe running a shell command, with zero delays for fast tests.
pub fn cmd_probe(cmd: &str, retries: u32) -> ProbeConfig {
    ProbeConfig {
        target: ProbeTarget::Cmd(cmd.to_string()),
        retries,
        delay: Duration::ZERO,
        timeout: Duration::from_secs(5),
        start_period: Duration::ZERO,
    }
}

/// A unit with the given dependencies, ports, and probe.
pub fn unit(deps: &[&str], ports: &[&str], probe: Option<ProbeConfig>) -> UnitConfig {
    UnitConfig {
        depends_on: deps.iter().map(|d| UnitName::new(d).unwrap()).collect(),
        start: ActionRef::new("true".to_string()),
        stop: ActionRef::new("true".to_string()),
        ports: ports.iter().map(|p| p.parse().unwrap()).collect(),
        probe,
    }
}

/// A stack whose ledger lives under the given state directory.
pub fn stack(state_dir: &Path, units: Vec<(&str, UnitConfig)>) -> StackConfig {
    StackConfig {
        stack: StackName::new("test-stack").unwrap(),
        profile: Profile::Dev,
        ports: PortsConfig::default(),
        state_dir: Some(state_dir.to_path_buf()),
        units: units
            .into_iter()
            .map(|(name, unit)| (UnitName::new(name).unwrap(), unit))
            .collect::<BTreeMap<_, _>>(),
        env: HashMap::new(),
    }
}
