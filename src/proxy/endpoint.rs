// src/proxy/endpoint.rs
use crate::config::{EndpointAddr, HealthCheckConfig};
use crate::health::{ProbeClient, ProbeOutcome};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

/// One backend server. Identity is fixed at creation; health state lives in
/// the `Router`, so the endpoint itself only carries counters and the probe
/// client.
#[derive(Debug)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: u16,
    health_path: String,
    probe_client: ProbeClient,
    stats: EndpointStats,
}

impl Endpoint {
    pub fn new(addr: EndpointAddr, health_path: impl Into<String>, probe_client: ProbeClient) -> Self {
        Self {
            scheme: addr.scheme,
            host: addr.host,
            port: addr.port,
            health_path: health_path.into(),
            probe_client,
            stats: EndpointStats::new(),
        }
    }

    pub fn from_config(addr: EndpointAddr, health: &HealthCheckConfig) -> reqwest::Result<Self> {
        let probe_client = ProbeClient::new(health.timeout())?;
        Ok(Self::new(addr, health.path.clone(), probe_client))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// `scheme://host:port`
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn health_url(&self) -> String {
        format!("{}{}", self.address(), self.health_path)
    }

    /// Resolves the address into a URL requests can be forwarded to.
    pub fn destination(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.address())
    }

    /// Probes the health path. Never fails: transport errors, timeouts and
    /// non-2xx statuses all come back as `healthy: false`.
    pub async fn probe(&self) -> ProbeOutcome {
        let started_at = Utc::now();
        let healthy = match self.probe_client.check(&self.health_url()).await {
            Ok(()) => {
                self.stats.healthy_probes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(reason) => {
                self.stats.unhealthy_probes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(endpoint = %self.address(), %reason, "health probe failed");
                false
            }
        };

        ProbeOutcome { healthy, started_at }
    }

    pub fn record_request(&self) {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.stats.started_at,
            requests: self.stats.requests.load(Ordering::Relaxed),
            healthy_probes: self.stats.healthy_probes.load(Ordering::Relaxed),
            unhealthy_probes: self.stats.unhealthy_probes.load(Ordering::Relaxed),
        }
    }
}

// Observability only; nothing routes on these.
#[derive(Debug)]
struct EndpointStats {
    started_at: DateTime<Utc>,
    requests: AtomicU64,
    healthy_probes: AtomicU64,
    unhealthy_probes: AtomicU64,
}

impl EndpointStats {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            requests: AtomicU64::new(0),
            healthy_probes: AtomicU64::new(0),
            unhealthy_probes: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub requests: u64,
    pub healthy_probes: u64,
    pub unhealthy_probes: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#req: {}, #good: {}, #bad: {}",
            self.requests, self.healthy_probes, self.unhealthy_probes
        )
    }
}
