// ABOUTME: Pluggable health probes: HTTP status, TCP connect, command exit.
// ABOUTME: A single check() is one sample; the retry budget lives in the caller.

use crate::config::{HttpProbeConfig, ProbeConfig, ProbeTarget, TcpProbeConfig};
use crate::ports::PortMapping;
use http_body_util::BodyExt;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;

/// Verdict of a single probe attempt.
///
/// `Fail` is one sample, not a terminal state; a unit only becomes
/// unhealthy when the caller's retry budget is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Pass,
    Fail(String),
}

impl ProbeOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, ProbeOutcome::Pass)
    }
}

/// An executable health check with its per-attempt timeout.
///
/// Probes are side-effect-free and safe to call repeatedly.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    target: ProbeTarget,
    timeout: Duration,
}

impl HealthProbe {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            target: config.target.clone(),
            timeout: config.timeout,
        }
    }

    /// Build a probe whose port follows the unit's final port assignment.
    ///
    /// A probe declared against a preferred host port that the allocator
    /// remapped must target the assigned port instead, or it would sample
    /// whatever else lives on the old port.
    pub fn from_config_with_ports(config: &ProbeConfig, mappings: &[PortMapping]) -> Self {
        let mut target = config.target.clone();
        match &mut target {
            ProbeTarget::Http(http) => http.port = resolve_port(http.port, mappings),
            ProbeTarget::Tcp(tcp) => tcp.port = resolve_port(tcp.port, mappings),
            ProbeTarget::Cmd(_) => {}
        }
        Self {
            target,
            timeout: config.timeout,
        }
    }

    /// Run one probe attempt, bounded by the per-attempt timeout.
    pub async fn check(&self) -> ProbeOutcome {
        let attempt = async {
            match &self.target {
                ProbeTarget::Http(http) => check_http(http).await,
                ProbeTarget::Tcp(tcp) => check_tcp(tcp).await,
                ProbeTarget::Cmd(cmd) => check_cmd(cmd).await,
            }
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::Fail(format!(
                "probe timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}

fn resolve_port(declared: u16, mappings: &[PortMapping]) -> u16 {
    mappings
        .iter()
        .find(|m| m.requested_host_port == declared)
        .map(|m| m.assigned_host_port)
        .unwrap_or(declared)
}

async fn check_tcp(config: &TcpProbeConfig) -> ProbeOutcome {
    match TcpStream::connect((config.host.as_str(), config.port)).await {
        Ok(_) => ProbeOutcome::Pass,
        Err(e) => ProbeOutcome::Fail(format!(
            "tcp connect {}:{} failed: {}",
            config.host, config.port, e
        )),
    }
}

async fn check_cmd(cmd: &str) -> ProbeOutcome {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => ProbeOutcome::Pass,
        Ok(output) => ProbeOutcome::Fail(format!(
            "command exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )),
        Err(e) => ProbeOutcome::Fail(format!("failed to spawn probe command: {e}")),
    }
}

async fn check_http(config: &HttpProbeConfig) -> ProbeOutcome {
    let stream = match TcpStream::connect((config.host.as_str(), config.port)).await {
        Ok(stream) => stream,
        Err(e) => {
            return ProbeOutcome::Fail(format!(
                "http connect {}:{} failed: {}",
                config.host, config.port, e
            ));
        }
    };

    let io = TokioIo::new(stream);

    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(e) => return ProbeOutcome::Fail(format!("http handshake failed: {e}")),
    };

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("probe connection error: {e}");
        }
    });

    let req = match hyper::Request::builder()
        .method("GET")
        .uri(&config.path)
        .header("Host", format!("{}:{}", config.host, config.port))
        .body(http_body_util::Empty::<bytes::Bytes>::new())
    {
        Ok(req) => req,
        Err(e) => return ProbeOutcome::Fail(format!("failed to build request: {e}")),
    };

    let resp = match sender.send_request(req).await {
        Ok(resp) => resp,
        Err(e) => return ProbeOutcome::Fail(format!("http request failed: {e}")),
    };

    let status = resp.status().as_u16();

    // Drain the body so the connection shuts down cleanly.
    let _ = resp.into_body().collect().await;

    if config.accept.iter().any(|code| *code == status) {
        ProbeOutcome::Pass
    } else {
        ProbeOutcome::Fail(format!(
            "http {} returned status {}, accepted: {:?}",
            config.path,
            status,
            config.accept.iter().collect::<Vec<_>>()
        ))
    }
}
