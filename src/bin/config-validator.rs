//! # Collector Configuration Validator
//!
//! Command-line tool for validating collector configuration before starting
//! the reconciliation loop. Loads the same layered configuration the loop
//! would, runs validation, and prints a summary of every source budget.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use collector_core::config::ConfigManager;
use collector_core::CollectorConfig;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate collector configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment overlay to apply (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the full configuration (default)
    Validate,

    /// Print the effective configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();
    collector_core::logging::init_structured_logging();

    let result = match cli.command {
        Some(Commands::Show) => show_config(&cli),
        Some(Commands::Validate) | None => validate_config(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Configuration validation failed");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<CollectorConfig> {
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .context("failed to load collector configuration")?;
    Ok(manager.config().clone())
}

fn validate_config(cli: &Cli) -> Result<()> {
    println!("🔧 Validating Collector Configuration");
    println!("Environment: {}", cli.environment);
    if let Some(config_dir) = &cli.config_dir {
        println!("Config Directory: {}", config_dir.display());
    }
    println!();

    let config = load(cli)?;
    println!("✅ Configuration loaded and validated");

    println!("\n📊 Sources ({}):", config.sources.len());
    for (source, budget) in &config.sources {
        println!(
            "   {source}: {} req/s, burst {}, max concurrent {}",
            budget.rate_per_second, budget.burst_capacity, budget.max_concurrent
        );
    }

    println!("\n⚙️  Execution:");
    println!("   Global pool size: {}", config.execution.global_pool_size);
    println!("   Worker timeout: {}ms", config.execution.worker_timeout_ms);
    println!("   Max retries: {}", config.execution.max_retries);

    println!("\n🔁 Reconciliation:");
    println!("   Cycle interval: {}ms", config.reconciliation.cycle_interval_ms);
    println!("   Cycle deadline: {}ms", config.reconciliation.cycle_deadline_ms);
    println!(
        "   Systemic retry: {}ms base, {}ms max",
        config.reconciliation.systemic_retry_base_ms, config.reconciliation.systemic_retry_max_ms
    );

    let total_concurrency: usize = config.sources.values().map(|b| b.max_concurrent).sum();
    if total_concurrency < config.execution.global_pool_size {
        println!(
            "\n⚠️  Global pool ({}) exceeds the sum of per-source caps ({}); some slots will never be used",
            config.execution.global_pool_size, total_concurrency
        );
    }

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn show_config(cli: &Cli) -> Result<()> {
    let config = load(cli)?;
    let rendered =
        serde_json::to_string_pretty(&config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}
