//! resolvwriter binary entry point.

use apps_dns::config::TelemetryConfig;
use apps_dns::resolvwriter::{self, Backoff, SystemLookup};
use apps_dns::telemetry;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

/// Render a resolv.conf pointing at an upstream DNS host once it resolves.
#[derive(Parser, Debug)]
#[command(name = "resolvwriter")]
#[command(version, about, long_about = None)]
struct Args {
    /// The upstream DNS host to be resolved.
    #[arg(long)]
    upstream_dns_host: String,

    /// The output path for the rendered resolv.conf.
    #[arg(long)]
    out: PathBuf,

    /// Give up after this many lookups. Retries forever when unset.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Log level filter, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let telemetry_config = TelemetryConfig {
        log_level: args.log_level.clone(),
        ..TelemetryConfig::default()
    };
    telemetry::init(&telemetry_config).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        host = %args.upstream_dns_host,
        out = %args.out.display(),
        "Starting resolvwriter"
    );

    let lookup = SystemLookup::from_system_config()?;
    let result = resolvwriter::run(
        &lookup,
        &args.upstream_dns_host,
        &args.out,
        Backoff::default(),
        args.max_attempts,
    )
    .await;

    telemetry::shutdown();

    match result {
        Ok(ips) => {
            info!(count = ips.len(), out = %args.out.display(), "resolv.conf written");
            Ok(())
        }
        Err(e) => {
            error!("resolvwriter failed: {}", e);
            Err(e.into())
        }
    }
}
