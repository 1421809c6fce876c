// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AgentMesh Controller CLI
//!
//! The `agentmesh` binary runs the reconciliation engine over an in-memory
//! cluster store seeded from manifest files.
//!
//! ## Commands
//!
//! - `agentmesh run [-m PATH]` - Run the controller until Ctrl-C
//! - `agentmesh reconcile PATH` - One reconcile pass with a per-agent report
//! - `agentmesh dependents KIND OBJECT -m PATH` - Agents affected by a change
//! - `agentmesh config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use agentmesh_core::domain::controller_config::{ControllerConfigManifest, LogFormat};
use agentmesh_orchestrator::commands::{self, ConfigCommand, DependentsArgs, ReconcileArgs, RunArgs};

/// AgentMesh controller - reconcile declarative agents into routable services
#[derive(Parser)]
#[command(name = "agentmesh")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "AGENTMESH_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config file
    #[arg(long, global = true, env = "AGENTMESH_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconcile controller
    #[command(name = "run")]
    Run(RunArgs),

    /// Reconcile a manifest set once and report the outcome
    #[command(name = "reconcile")]
    Reconcile(ReconcileArgs),

    /// List the agents a change to an object would re-reconcile
    #[command(name = "dependents")]
    Dependents(DependentsArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Some(command) => command,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    };

    if let Commands::Config { command } = command {
        init_logging(cli.log_level.as_deref().unwrap_or("warn"), LogFormat::Compact)?;
        return commands::config::handle_command(command, cli.config).await;
    }

    let config = ControllerConfigManifest::load_or_default(cli.config)
        .context("Failed to load configuration")?;
    let logging = &config.spec.observability.logging;
    init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), logging.format)?;

    match command {
        Commands::Run(args) => commands::run::execute(args, config).await,
        Commands::Reconcile(args) => commands::reconcile::execute(args, config).await,
        Commands::Dependents(args) => commands::dependents::execute(args, config).await,
        Commands::Config { .. } => Ok(()),
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
