// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use agentmesh_core::domain::controller_config::ControllerConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./agentmesh-config.yaml")]
        output: PathBuf,

        /// Include every setting with comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ControllerConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. AGENTMESH_CONFIG_PATH: {}",
            std::env::var("AGENTMESH_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./agentmesh-config.yaml");
        println!("  4. ~/.agentmesh/config.yaml");
        println!("  5. /etc/agentmesh/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    let spec = &config.spec;
    println!("{}", "Controller:".bold());
    println!("  Name: {}", config.metadata.name);
    if spec.watch_namespaces.is_empty() {
        println!("  Watched namespaces: {}", "(all)".dimmed());
    } else {
        println!("  Watched namespaces: {}", spec.watch_namespaces.join(", "));
    }
    println!("  A2A proxy: {}", spec.a2a_proxy_base_url);
    println!();

    println!("{}", "Reconcile:".bold());
    println!("  Timeout: {}s", spec.reconcile.timeout_seconds);
    println!("  Workers: {}", spec.reconcile.workers);
    println!("  Tool refresh: {}s", spec.reconcile.tool_refresh_interval_seconds);
    println!("  Not-ready requeue: {}s", spec.reconcile.not_ready_requeue_seconds);
    println!(
        "  Backoff: {}ms → {}ms (x{})",
        spec.reconcile.backoff.initial_millis,
        spec.reconcile.backoff.max_millis,
        spec.reconcile.backoff.multiplier
    );
    println!();

    println!("{}", "Discovery:".bold());
    println!("  Timeout: {}s", spec.discovery.timeout_seconds);
    println!();

    println!("{}", "Logging:".bold());
    println!("  Level: {}", spec.observability.logging.level);
    println!("  Format: {:?}", spec.observability.logging.format);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ControllerConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_parse_and_validate() {
        for template in [
            include_str!("../../templates/config-minimal.yaml"),
            include_str!("../../templates/config-with-examples.yaml"),
        ] {
            let config = ControllerConfigManifest::from_yaml_str(template).unwrap();
            config.validate().unwrap();
        }
    }

    #[tokio::test]
    async fn test_generate_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("agentmesh-config.yaml");
        generate(output.clone(), false).await.unwrap();

        let config = ControllerConfigManifest::from_yaml_file(&output).unwrap();
        assert_eq!(config.metadata.name, "agentmesh-controller");
    }
}
