// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flotilla")]
#[command(about = "Dependency-ordered stack orchestration with health gates and rollback")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new flotilla.yml configuration file
    Init {
        /// Stack name to write into the template
        #[arg(long)]
        stack: Option<String>,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Bring the stack up in dependency order
    Up {
        /// Override the profile declared in the stack file
        #[arg(long, value_parser = ["dev", "prod"])]
        profile: Option<String>,

        /// Break a held run lock
        #[arg(long)]
        force_lock: bool,

        /// Only print the final result
        #[arg(short, long)]
        quiet: bool,

        /// Emit JSON lines instead of human-readable output
        #[arg(long)]
        json: bool,
    },

    /// Print phases and port assignments without starting anything
    Plan {
        /// Override the profile declared in the stack file
        #[arg(long, value_parser = ["dev", "prod"])]
        profile: Option<String>,
    },

    /// Stop the units of the last recorded run
    Rollback,

    /// Show the last recorded run
    Status {
        /// Print the raw run record as JSON
        #[arg(long)]
        json: bool,
    },
}
