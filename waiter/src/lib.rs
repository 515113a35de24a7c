use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use reqwest::StatusCode;

/// Readiness check path, relative to the service base URL.
pub const HEALTH_PATH: &str = "/api/health";
/// 120 attempts at a 5s interval is roughly ten minutes.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Hostnames the compose network is expected to provide.
pub const EXPECTED_HOSTS: &[&str] = &["label-studio", "dataset-processor"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    Unavailable { attempts: u32 },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Readiness::Ready { attempts } | Readiness::Unavailable { attempts } => *attempts,
        }
    }
}

/// Polls the health endpoint at a fixed interval until it answers 200.
#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    client: reqwest::Client,
    max_attempts: u32,
    interval: Duration,
}

impl ReadinessWaiter {
    pub fn new(max_attempts: u32, interval: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            client,
            max_attempts,
            interval,
        })
    }

    /// Check `base_url` until it is ready or the attempt budget is spent.
    pub async fn poll(&self, base_url: &str) -> Readiness {
        let url = format!("{}{}", base_url.trim_end_matches('/'), HEALTH_PATH);
        let url = url.as_str();

        let readiness = self
            .poll_with(move |attempt| self.check_once(url, attempt))
            .await;
        match readiness {
            Readiness::Ready { attempts } => {
                tracing::info!(url = %base_url, attempts, "Service is ready");
            }
            Readiness::Unavailable { attempts } => {
                tracing::error!(url = %base_url, attempts, "Service did not become ready");
            }
        }
        readiness
    }

    /// Attempt loop around `check`, which reports whether attempt `n` found
    /// the service ready.
    ///
    /// Every failed attempt except the last one is followed by a sleep of
    /// `interval`, so a service that becomes ready on attempt `n` costs
    /// exactly `n - 1` sleeps.
    pub async fn poll_with<F, Fut>(&self, mut check: F) -> Readiness
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = bool>,
    {
        for attempt in 1..=self.max_attempts {
            if check(attempt).await {
                return Readiness::Ready { attempts: attempt };
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Readiness::Unavailable {
            attempts: self.max_attempts,
        }
    }

    async fn check_once(&self, url: &str, attempt: u32) -> bool {
        tracing::info!(url = %url, attempt, max_attempts = self.max_attempts, "Checking service availability");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await;

        match response {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    attempt,
                    max_attempts = self.max_attempts,
                    "Unexpected health check status"
                );
                false
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    attempt,
                    max_attempts = self.max_attempts,
                    "Waiting for service"
                );
                false
            }
        }
    }
}

/// Wait for the service at `base_url` to answer its health check.
pub async fn wait_for_service(base_url: &str, max_attempts: u32, interval: Duration) -> bool {
    match ReadinessWaiter::new(max_attempts, interval) {
        Ok(waiter) => waiter.poll(base_url).await.is_ready(),
        Err(err) => {
            tracing::error!(error = %err, "Failed to build health check client");
            false
        }
    }
}

#[derive(Debug)]
pub struct HostResolution {
    pub host: String,
    pub addresses: io::Result<Vec<IpAddr>>,
}

/// Resolve each host and log the outcome. Diagnostic only.
pub async fn resolve_hosts(hosts: &[&str]) -> Vec<HostResolution> {
    let mut resolutions = Vec::with_capacity(hosts.len());
    for host in hosts {
        let addresses = tokio::net::lookup_host((*host, 0))
            .await
            .map(|addrs| addrs.map(|addr| addr.ip()).collect::<Vec<_>>());
        match &addresses {
            Ok(ips) => tracing::info!(host = %host, addresses = ?ips, "Resolved host"),
            Err(err) => tracing::warn!(host = %host, error = %err, "Failed to resolve host"),
        }
        resolutions.push(HostResolution {
            host: host.to_string(),
            addresses,
        });
    }
    resolutions
}
