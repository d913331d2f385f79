//! `tollgate trust` command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tollgate::AdmissionConfig;
use tollgate::trust::{TrustCheck, TrustConfig, TrustEvaluator};

/// Arguments for the `tollgate trust` command.
#[derive(Args, Debug)]
pub struct TrustArgs {
    /// Caller address (IPv4 or IPv6).
    pub ip: String,

    /// Endpoint the request targets.
    #[arg(long, short = 'e')]
    pub endpoint: Option<String>,

    /// Configuration to read trusted entries from.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Extra trusted address or CIDR range (repeatable).
    #[arg(long = "trusted", short = 't')]
    pub trusted: Vec<String>,

    /// Output JSON instead of human-readable format.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct TrustReport<'a> {
    ip: &'a str,
    endpoint: Option<&'a str>,
    #[serde(flatten)]
    check: TrustCheck,
}

/// Run the trust command.
///
/// # Errors
///
/// Returns an error if the configuration or a trusted entry is invalid.
pub fn run(args: &TrustArgs) -> Result<()> {
    let mut trust = match &args.config {
        Some(path) => {
            let config = AdmissionConfig::load(path)
                .with_context(|| format!("invalid configuration {}", path.display()))?;
            TrustConfig {
                bypass_endpoints: config.bypass_endpoints(),
                ..config.trust
            }
        }
        None => TrustConfig::default(),
    };
    trust.trusted.extend(args.trusted.iter().cloned());

    let evaluator = TrustEvaluator::from_config(&trust).context("invalid trusted entry")?;
    let check = evaluator.check_trust(&args.ip, args.endpoint.as_deref());

    if args.json {
        let report = TrustReport {
            ip: &args.ip,
            endpoint: args.endpoint.as_deref(),
            check,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}: {} ({})", args.ip, check.level, check.reason);
    Ok(())
}
