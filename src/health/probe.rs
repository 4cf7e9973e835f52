// src/health/probe.rs
use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::time::{timeout, Duration};

/// Idle keep-alive connections are dropped after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a single health probe against one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    /// When the probe was issued, not when it finished.
    pub started_at: DateTime<Utc>,
}

/// Reusable HTTP client used only for health probes. Keeps at most one idle
/// connection per endpoint and bounds every probe by a fixed timeout.
#[derive(Debug, Clone)]
pub struct ProbeClient {
    client: Client,
    timeout: Duration,
}

impl ProbeClient {
    pub fn new(probe_timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(probe_timeout)
            .pool_max_idle_per_host(1)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            timeout: probe_timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `Ok` only when the request completed and the status is 2xx. The error
    /// string describes why the endpoint is considered unhealthy.
    pub async fn check(&self, url: &str) -> Result<(), String> {
        match timeout(self.timeout, self.client.get(url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(format!("HTTP {}", response.status())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("Request timeout".to_string()),
        }
    }
}
