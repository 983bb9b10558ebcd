// ABOUTME: Entry point for the flotilla CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use flotilla::config::{self, Profile, StackConfig};
use flotilla::error::{Error, Result};
use flotilla::graph::ServiceGraph;
use flotilla::hooks::HookRunner;
use flotilla::ledger::{DeploymentRun, LedgerStore, RunStatus};
use flotilla::orchestrate::{Orchestrator, manual_rollback};
use flotilla::output::{Output, OutputMode};
use flotilla::ports::{PortAllocator, TcpBindScan};
use flotilla::runtime::ProcessRuntime;
use std::collections::BTreeSet;
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { stack, force } => {
            let cwd = env::current_dir()?;
            config::init_config(&cwd, stack.as_deref(), force)
        }
        Commands::Up {
            profile,
            force_lock,
            quiet,
            json,
        } => up(profile.as_deref(), force_lock, quiet, json).await,
        Commands::Plan { profile } => plan(profile.as_deref()),
        Commands::Rollback => rollback().await,
        Commands::Status { json } => status(json),
    }
}

/// Load the stack config from the working directory, applying a profile
/// override from the command line.
fn load_config(profile: Option<&str>) -> Result<StackConfig> {
    let cwd = env::current_dir()?;
    let mut config = StackConfig::discover(&cwd)?;
    if let Some(p) = profile {
        config.profile = match p {
            "prod" => Profile::Prod,
            _ => Profile::Dev,
        };
    }
    Ok(config)
}

/// Bring the stack up, resuming from the last recorded run.
async fn up(profile: Option<&str>, force_lock: bool, quiet: bool, json: bool) -> Result<()> {
    let config = load_config(profile)?;

    let mode = if json {
        OutputMode::Json
    } else if quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let mut output = Output::new(mode);
    output.start_timer();

    output.progress(&format!(
        "Bringing up stack '{}' ({} profile, {} units)",
        config.stack,
        config.profile,
        config.units.len()
    ));

    let store = LedgerStore::new(config.state_dir());
    let cwd = env::current_dir()?;
    let orchestrator =
        Orchestrator::new(ProcessRuntime::new(), store).with_hooks(HookRunner::new(&cwd));

    // Ctrl-C aborts the run: probe loops stop at their next wakeup and
    // started units are rolled back.
    let abort = orchestrator.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    let run = orchestrator.run(&config, force_lock).await?;

    match run.status {
        RunStatus::Succeeded => {
            output.success(&format!(
                "✓ stack '{}' up (run {}, {} units)",
                config.stack,
                run.run_id,
                run.unit_states.len()
            ));
            report_remapped_ports(&output, &run);
            Ok(())
        }
        status => {
            for failure in &run.failed_units {
                output.error(&format!("unit '{}' failed: {}", failure.unit, failure.reason));
            }
            for failure in &run.rollback_failures {
                output.error(&format!(
                    "rollback of '{}' failed: {}",
                    failure.unit, failure.reason
                ));
            }
            Err(Error::Deploy(format!(
                "run {} ended {status}",
                run.run_id
            )))
        }
    }
}

fn report_remapped_ports(output: &Output, run: &DeploymentRun) {
    for mapping in &run.port_mappings {
        if mapping.requested_host_port != mapping.assigned_host_port {
            output.progress(&format!(
                "  port {} of '{}' remapped to {}",
                mapping.requested_host_port, mapping.unit, mapping.assigned_host_port
            ));
        }
    }
}

/// Print the phase plan and port assignments without side effects.
fn plan(profile: Option<&str>) -> Result<()> {
    let config = load_config(profile)?;

    let graph = ServiceGraph::from_config(&config)
        .map_err(flotilla::orchestrate::OrchestrateError::from)?;

    println!("Stack: {} ({} profile)", config.stack, config.profile);
    for phase in graph.phases() {
        let names: Vec<&str> = phase.units.iter().map(|u| u.as_str()).collect();
        println!("  phase {}: {}", phase.index, names.join(", "));
    }

    let fallback = config.profile.fallback_ports(&config.ports.range);
    let allocator = PortAllocator::new(&TcpBindScan, fallback);
    let mappings = allocator
        .allocate(graph.declared_ports(), &BTreeSet::new())
        .map_err(flotilla::orchestrate::OrchestrateError::from)?;

    if !mappings.is_empty() {
        println!("Ports:");
        for m in mappings {
            if m.requested_host_port == m.assigned_host_port {
                println!("  {}: {} -> {}", m.unit, m.assigned_host_port, m.container_port);
            } else {
                println!(
                    "  {}: {} -> {} (requested {}, {:?})",
                    m.unit, m.assigned_host_port, m.container_port, m.requested_host_port, m.reason
                );
            }
        }
    }

    Ok(())
}

/// Tear down the units of the last recorded run.
async fn rollback() -> Result<()> {
    let config = load_config(None)?;
    let store = LedgerStore::new(config.state_dir());
    let runtime = ProcessRuntime::new();

    println!("Rolling back stack '{}'", config.stack);
    let run = manual_rollback(&runtime, &config, &store).await?;

    for failure in &run.rollback_failures {
        eprintln!(
            "Warning: rollback of '{}' failed: {}",
            failure.unit, failure.reason
        );
    }
    println!("Rollback complete (run {})", run.run_id);
    Ok(())
}

/// Render the last recorded run for this stack.
fn status(json: bool) -> Result<()> {
    let config = load_config(None)?;
    let store = LedgerStore::new(config.state_dir());

    let run = store
        .load(&config.stack)
        .map_err(flotilla::orchestrate::OrchestrateError::from)?;

    let Some(run) = run else {
        println!("No recorded run for stack '{}'", config.stack);
        return Ok(());
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run).map_err(|e| Error::Deploy(e.to_string()))?
        );
        return Ok(());
    }

    println!("Stack:   {}", run.stack);
    println!("Run:     {}", run.run_id);
    println!("Started: {}", run.started_at);
    println!("Status:  {}", run.status);
    println!("Units:");
    for (unit, state) in &run.unit_states {
        println!("  {unit}: {state}");
    }
    if !run.port_mappings.is_empty() {
        println!("Ports:");
        for m in &run.port_mappings {
            println!(
                "  {}: {} -> {} ({:?})",
                m.unit, m.assigned_host_port, m.container_port, m.reason
            );
        }
    }
    for failure in &run.failed_units {
        println!("Failed:  {} ({})", failure.unit, failure.reason);
    }
    Ok(())
}
