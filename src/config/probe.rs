// ABOUTME: Health probe configuration with per-unit retry policy.
// ABOUTME: Three probe kinds: HTTP status, TCP connect, command exit code.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::time::Duration;

/// Health probe descriptor for a unit, including the retry budget.
///
/// Retry counts and delays are configurable per unit because cold-start
/// times vary wildly across the stack (a cache is up in milliseconds, an
/// LLM runtime can take minutes).
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(flatten)]
    pub target: ProbeTarget,

    /// Probe attempts before the unit is declared unhealthy.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay between attempts.
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub delay: Duration,

    /// Per-attempt timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Grace period before the first attempt.
    #[serde(default = "default_start_period", with = "humantime_serde")]
    pub start_period: Duration,
}

/// What the probe actually checks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeTarget {
    Http(HttpProbeConfig),
    Tcp(TcpProbeConfig),
    Cmd(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpProbeConfig {
    #[serde(default = "default_host")]
    pub host: String,

    pub port: u16,

    #[serde(default = "default_path")]
    pub path: String,

    /// HTTP status codes counted as a pass.
    #[serde(default = "default_accept")]
    pub accept: NonEmpty<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpProbeConfig {
    #[serde(default = "default_host")]
    pub host: String,

    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_accept() -> NonEmpty<u16> {
    NonEmpty::new(200)
}

fn default_retries() -> u32 {
    3
}

fn default_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_start_period() -> Duration {
    Duration::ZERO
}
