//! Content Workaround Harness (cwh-runner) - Main entry point
//!
//! Runs the scenario matrix (from the config file, or the built-in content
//! workaround suite) against the simulated media backend and prints the report.
//! Exits non-zero when any scenario failed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cwh_runner::backend::SimulatedBackend;
use cwh_runner::config::HarnessConfig;
use cwh_runner::report::CliFormatter;
use cwh_runner::TestLifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Command-line arguments for cwh-runner
#[derive(Parser, Debug)]
#[command(name = "cwh-runner")]
#[command(about = "Content workaround test harness")]
#[command(version)]
struct Args {
    /// Config file (overrides CWH_CONFIG and the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only run scenarios whose id contains this text
    #[arg(short, long)]
    filter: Option<String>,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Treat the platform as a virtual machine
    #[arg(long)]
    running_in_vm: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "CWH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Root prepended to relative content locators
    #[arg(long)]
    asset_root: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Config is loaded before tracing so its log level can apply; load errors
    // still surface through anyhow
    let config = HarnessConfig::load(args.config.as_deref());
    let log_level = args
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().map(|c| c.harness.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cwh_runner={log_level},cwh_common={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = config.context("Failed to load harness configuration")?;
    if args.running_in_vm {
        config.environment.running_in_vm = true;
    }
    if let Some(asset_root) = args.asset_root {
        config.harness.asset_root = asset_root;
    }

    let mut matrix = config.matrix().context("Failed to build scenario matrix")?;
    if let Some(pattern) = &args.filter {
        matrix = matrix.filter(pattern);
        if matrix.is_empty() {
            warn!("No scenario matches filter '{}'", pattern);
        }
    }
    info!(
        "Running {} scenarios (device '{}', in VM: {})",
        matrix.len(),
        config.environment.device.name,
        config.environment.running_in_vm
    );

    let backend = SimulatedBackend::new(config.simulation.clone(), config.environment.clone())
        .with_builtin_catalog(&config.harness.asset_root);
    let lifecycle = TestLifecycle::new(Arc::new(backend), config.environment.clone())
        .with_options(config.lifecycle_options());

    let report = lifecycle.run_matrix(&matrix).await;

    match args.format {
        OutputFormat::Text => print!("{}", CliFormatter::format_report(&report)),
        OutputFormat::Json => println!(
            "{}",
            report.to_json().context("Failed to serialize report")?
        ),
    }

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
