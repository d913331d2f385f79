//! `tollgate validate` command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tollgate::AdmissionConfig;

/// Arguments for the `tollgate validate` command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the TOML configuration.
    pub config: PathBuf,

    /// Print the resolved configuration as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ValidationReport<'a> {
    valid: bool,
    path: String,
    config: &'a AdmissionConfig,
}

/// Run the validate command.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn run(args: &ValidateArgs) -> Result<()> {
    let config = AdmissionConfig::load(&args.config)
        .with_context(|| format!("invalid configuration {}", args.config.display()))?;

    if args.json {
        let report = ValidationReport {
            valid: true,
            path: args.config.display().to_string(),
            config: &config,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Configuration OK: {}", args.config.display());
    let cache = config
        .cache
        .cluster
        .as_ref()
        .map_or_else(
            || format!("{:?}", config.cache.backend).to_lowercase(),
            |cluster| format!("redis cluster ({} seed nodes)", cluster.nodes.len()),
        );
    println!("  store:     {cache}");
    println!(
        "  adaptive:  {} (bounds {}..={})",
        if config.adaptive.enabled { "on" } else { "off" },
        config.adaptive.min_limit,
        config.adaptive.max_limit
    );
    println!(
        "  default:   {} req / {} ms",
        config.limits.default.base_limit(),
        config.limits.default.window_ms
    );
    for (name, endpoint) in &config.limits.endpoints {
        println!(
            "  endpoint:  {name} {} req / {} ms{}",
            endpoint.base_limit(),
            endpoint.window_ms,
            if endpoint.bypass_eligible { " (bypass)" } else { "" }
        );
    }
    println!("  trusted:   {} entries", config.trust.trusted.len());

    Ok(())
}
