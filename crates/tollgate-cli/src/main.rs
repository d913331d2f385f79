//! Tollgate operator CLI entrypoint.
//!
//! - `tollgate validate` - check a configuration file
//! - `tollgate trust` - evaluate trust for an address
//! - `tollgate simulate` - replay a burst of requests against an in-memory store

#![forbid(unsafe_code)]

mod simulate;
mod trust;
mod validate;

use clap::{Parser, Subcommand};
use tollgate::telemetry::{TelemetryConfig, init_logging};

/// Tollgate admission control CLI.
#[derive(Parser)]
#[command(name = "tollgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level when `RUST_LOG` is unset. `simulate` otherwise uses the
    /// configuration's `[telemetry]` section; other commands default to `warn`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file.
    ///
    /// Applies `TOLLGATE_*` environment overrides before validating.
    Validate(validate::ValidateArgs),

    /// Evaluate trust for a caller address.
    ///
    /// Example: tollgate trust 10.1.2.3 --config tollgate.toml
    Trust(trust::TrustArgs),

    /// Simulate a burst of requests from one caller.
    ///
    /// Runs the full admission pipeline against an in-memory store, counting
    /// admitted requests in a single window.
    Simulate(simulate::SimulateArgs),
}

const DEFAULT_LOG_LEVEL: &str = "warn";

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_level = cli.log_level.as_deref();

    match cli.command {
        Commands::Validate(args) => {
            init_cli_logging(log_level)?;
            validate::run(&args)
        }
        Commands::Trust(args) => {
            init_cli_logging(log_level)?;
            trust::run(&args)
        }
        // Installs telemetry from the loaded configuration.
        Commands::Simulate(args) => simulate::run(&args, log_level),
    }
}

fn init_cli_logging(log_level: Option<&str>) -> anyhow::Result<()> {
    init_logging(
        &TelemetryConfig::new("tollgate-cli")
            .with_log_level(log_level.unwrap_or(DEFAULT_LOG_LEVEL))
            .with_json_logs(false),
    )?;
    Ok(())
}
