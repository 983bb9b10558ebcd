// ABOUTME: Configuration types and parsing for flotilla.yml.
// ABOUTME: Handles YAML parsing, env references, and unit declarations.

mod env_value;
mod probe;
mod profile;

pub use env_value::{EnvValue, resolve_env_map};
pub use probe::{HttpProbeConfig, ProbeConfig, ProbeTarget, TcpProbeConfig};
pub use profile::{PortRange, Profile};

use crate::error::{Error, Result};
use crate::ports::PortSpec;
use crate::types::{ActionRef, StackName, UnitName};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "flotilla.yml";
pub const CONFIG_FILENAME_ALT: &str = "flotilla.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".flotilla/config.yml";

/// Base directory for flotilla state files (XDG Base Directory compliant).
const STATE_DIR: &str = ".local/state/flotilla";

#[derive(Debug, Clone, Deserialize)]
pub struct StackConfig {
    #[serde(deserialize_with = "deserialize_stack_name")]
    pub stack: StackName,

    #[serde(default)]
    pub profile: Profile,

    #[serde(default)]
    pub ports: PortsConfig,

    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    pub units: BTreeMap<UnitName, UnitConfig>,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
}

/// A single declared service unit.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitConfig {
    #[serde(default)]
    pub depends_on: BTreeSet<UnitName>,

    pub start: ActionRef,

    pub stop: ActionRef,

    #[serde(default, deserialize_with = "deserialize_ports")]
    pub ports: Vec<PortSpec>,

    /// No probe means the unit is considered healthy once started.
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortsConfig {
    #[serde(default)]
    pub range: PortRange,
}

impl StackConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: StackConfig = serde_yaml::from_str(yaml)?;
        if config.units.is_empty() {
            return Err(Error::InvalidConfig(
                "stack must declare at least one unit".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Directory holding the run ledger and lock for this stack.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        let home = std::env::var_os("HOME").unwrap_or_else(|| ".".into());
        PathBuf::from(home).join(STATE_DIR)
    }

    pub fn template() -> Self {
        let mut units = BTreeMap::new();
        units.insert(
            UnitName::new("my-service").unwrap(),
            UnitConfig {
                depends_on: BTreeSet::new(),
                start: ActionRef::new("systemctl --user start my-service".to_string()),
                stop: ActionRef::new("systemctl --user stop my-service".to_string()),
                ports: vec![],
                probe: None,
            },
        );
        StackConfig {
            stack: StackName::new("my-stack").unwrap(),
            profile: Profile::default(),
            ports: PortsConfig::default(),
            state_dir: None,
            units,
            env: HashMap::new(),
        }
    }
}

pub fn init_config(dir: &Path, stack: Option<&str>, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let mut config = StackConfig::template();

    if let Some(s) = stack {
        config.stack = StackName::new(s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    }

    let yaml = generate_template_yaml(&config);
    std::fs::write(&config_path, yaml)?;

    Ok(())
}

fn generate_template_yaml(config: &StackConfig) -> String {
    format!(
        r#"stack: {}
profile: dev
units:
  my-service:
    start: "systemctl --user start my-service"
    stop: "systemctl --user stop my-service"
    ports:
      - "8080:8080"
    probe:
      http:
        port: 8080
        path: /healthz
"#,
        config.stack,
    )
}

// Custom deserializers

fn deserialize_stack_name<'de, D>(deserializer: D) -> std::result::Result<StackName, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    StackName::new(&s).map_err(serde::de::Error::custom)
}

fn deserialize_ports<'de, D>(deserializer: D) -> std::result::Result<Vec<PortSpec>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let specs: Vec<String> = Vec::deserialize(deserializer)?;
    specs
        .iter()
        .map(|s| s.parse().map_err(serde::de::Error::custom))
        .collect()
}
