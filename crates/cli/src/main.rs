use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, error};

mod bootstrap;
mod commands;

#[derive(Parser)]
#[command(name = "hostdb")]
#[command(version)]
#[command(about = "Host database tooling: config checks, snapshot and hosts file inspection")]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the configuration and print the effective settings
    Config,

    /// Summarize a persisted store snapshot
    Inspect {
        /// Snapshot file; defaults to the configured storage path
        path: Option<PathBuf>,

        /// List every record
        #[arg(short, long)]
        verbose: bool,

        #[arg(long)]
        json: bool,
    },

    /// Parse a hosts file and show the resulting overrides
    Hosts {
        /// Hosts file; defaults to the configured path
        path: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!(error = %e, "Command failed");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = bootstrap::load_config(cli.config.as_deref(), cli.log_level, cli.json_logs)?;
    bootstrap::init_logging(&config.logging);
    debug!(version = env!("CARGO_PKG_VERSION"), "hostdb starting");

    match cli.command {
        Command::Config => commands::config::run(&config),
        Command::Inspect { path, verbose, json } => {
            let path = path
                .or_else(|| config.hostdb.storage_path.clone())
                .ok_or_else(|| {
                    anyhow::anyhow!("no snapshot path given and hostdb.storage_path is unset")
                })?;
            commands::inspect::run(&path, verbose, json)
        }
        Command::Hosts { path, json } => {
            let path = path
                .or_else(|| config.hostdb.hostfile_path.clone())
                .ok_or_else(|| {
                    anyhow::anyhow!("no hosts file given and hostdb.hostfile_path is unset")
                })?;
            commands::hosts::run(&path, json)
        }
    }
}
