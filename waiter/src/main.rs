use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use labelsync_waiter::{
    resolve_hosts, wait_for_service, DEFAULT_MAX_ATTEMPTS, EXPECTED_HOSTS,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Wait until the labeling service answers its health check")]
struct Args {
    /// Labeling service base URL (e.g. http://label-studio:8080)
    #[arg(long, env = "LABEL_STUDIO_URL")]
    url: Option<String>,
    /// Number of health checks before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,
    /// Seconds between health checks
    #[arg(long, default_value_t = 5)]
    interval: u64,
    /// Hostnames to resolve for diagnostics
    #[arg(long, value_delimiter = ',')]
    hosts: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let hosts: Vec<&str> = if args.hosts.is_empty() {
        EXPECTED_HOSTS.to_vec()
    } else {
        args.hosts.iter().map(String::as_str).collect()
    };
    resolve_hosts(&hosts).await;

    tracing::info!(url = ?args.url, "Checking services");
    let Some(url) = args.url else {
        tracing::error!("LABEL_STUDIO_URL is not set");
        return Ok(ExitCode::FAILURE);
    };

    let ready = wait_for_service(&url, args.max_attempts, Duration::from_secs(args.interval)).await;
    if !ready {
        tracing::error!(service = "label_studio", "Services did not become ready");
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}
