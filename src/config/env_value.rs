// ABOUTME: Environment map values resolved from the secret provider handoff.
// ABOUTME: Literal values or named references resolved from the process environment.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// A value in the stack's environment map.
///
/// Secrets are never stored in the stack file: a `{ env: NAME }` entry is
/// resolved from the process environment at run start, which is where the
/// secret provider delivers credentials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl EnvValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            EnvValue::Literal(s) => Ok(s.clone()),
            EnvValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default
                    .clone()
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
        }
    }
}

/// Resolve the whole environment map once, before any unit starts.
/// A missing reference aborts the run before it has side effects.
pub fn resolve_env_map(map: &HashMap<String, EnvValue>) -> Result<HashMap<String, String>> {
    map.iter()
        .map(|(k, v)| v.resolve().map(|resolved| (k.clone(), resolved)))
        .collect()
}
