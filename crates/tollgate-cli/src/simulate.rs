//! `tollgate simulate` command implementation.
//!
//! Sends `--requests` checks from one caller through the admission pipeline.
//! The store is always in-process, so the run never touches a shared Redis.
//! Admitted requests advance the window count; denied ones do not.
//!
//! Telemetry comes from the configuration's `[telemetry]` section, after
//! `TOLLGATE_*` overrides: log format and level, plus the Prometheus
//! listener when enabled.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tollgate::ratelimit::RateDecision;
use tollgate::store::BackendKind;
use tollgate::telemetry::{AuditSink, NoopAuditSink, TracingAuditSink, init_telemetry};
use tollgate::{Admission, AdmissionConfig, AdmissionRequest};

/// Arguments for the `tollgate simulate` command.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of requests to send.
    #[arg(long, short = 'n', default_value_t = 20)]
    pub requests: u32,

    /// Caller identifier.
    #[arg(long, default_value = "simulated-caller")]
    pub caller: String,

    /// Endpoint name.
    #[arg(long, default_value = "/")]
    pub endpoint: String,

    /// Caller address.
    #[arg(long, default_value = "198.51.100.1")]
    pub ip: String,

    /// Response time reported for each request, in milliseconds.
    #[arg(long)]
    pub response_time_ms: Option<f64>,

    /// Configuration for limits and trust. The store section is ignored.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Output JSON instead of human-readable format.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Log store audit events through the logger.
    #[arg(long, default_value_t = false)]
    pub audit: bool,
}

#[derive(Debug, Serialize)]
struct SimulatedRequest {
    index: u32,
    window_count: u32,
    decision: RateDecision,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    caller: String,
    endpoint: String,
    ip: String,
    allowed: u32,
    denied: u32,
    requests: Vec<SimulatedRequest>,
}

/// Run the simulate command. `log_level` overrides `telemetry.log_level`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, telemetry cannot be
/// installed or the runtime cannot start.
pub fn run(args: &SimulateArgs, log_level: Option<&str>) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AdmissionConfig::load(path)
            .with_context(|| format!("invalid configuration {}", path.display()))?,
        None => {
            let mut config = AdmissionConfig::default();
            config
                .apply_env_overrides()
                .context("invalid TOLLGATE_* override")?;
            config
        }
    };
    config.cache.backend = BackendKind::Memory;
    config.cache.cluster = None;
    if let Some(level) = log_level {
        config.telemetry.log_level = level.to_string();
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let report = runtime.block_on(async {
        // The Prometheus listener needs the runtime.
        init_telemetry(&config.telemetry).context("failed to initialize telemetry")?;
        simulate(config, args).await
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for request in &report.requests {
        let decision = &request.decision;
        println!(
            "#{:<4} {:<7} limit={:<6} count={:<6} reason={}",
            request.index,
            if decision.allowed { "allowed" } else { "denied" },
            decision.adjusted_limit,
            request.window_count,
            decision.reason
        );
    }
    println!(
        "{} allowed, {} denied ({} {} from {})",
        report.allowed, report.denied, report.caller, report.endpoint, report.ip
    );
    Ok(())
}

async fn simulate(config: AdmissionConfig, args: &SimulateArgs) -> Result<SimulationReport> {
    let audit: Arc<dyn AuditSink> = if args.audit {
        Arc::new(TracingAuditSink)
    } else {
        Arc::new(NoopAuditSink)
    };
    let admission = Admission::start(config, audit)
        .await
        .context("failed to start admission pipeline")?;

    let mut window_count = 0u32;
    let mut requests = Vec::with_capacity(usize::try_from(args.requests).unwrap_or(0));
    let (mut allowed, mut denied) = (0u32, 0u32);

    for index in 1..=args.requests {
        let mut request =
            AdmissionRequest::new(&args.caller, &args.endpoint, &args.ip, window_count);
        if let Some(ms) = args.response_time_ms {
            request = request.with_response_time(ms);
        }

        let decision = admission.check(&request).await;
        tracing::debug!(index, allowed = decision.allowed, "simulated request");
        if decision.allowed {
            allowed += 1;
            window_count = window_count.saturating_add(1);
        } else {
            denied += 1;
        }
        requests.push(SimulatedRequest {
            index,
            window_count,
            decision,
        });
    }

    admission.shutdown();

    Ok(SimulationReport {
        caller: args.caller.clone(),
        endpoint: args.endpoint.clone(),
        ip: args.ip.clone(),
        allowed,
        denied,
        requests,
    })
}
