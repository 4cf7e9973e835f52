// src/health/checker.rs
use crate::health::ProbeOutcome;
use crate::load_balancer::Router;
use crate::metrics::MetricsCollector;
use crate::proxy::Endpoint;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinError;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{error, info};

/// Keeps the router's health table current by probing every endpoint on a
/// fixed interval.
pub struct HealthMonitor {
    router: Arc<Router>,
    interval: Duration,
    metrics: Option<Arc<MetricsCollector>>,
    // Held for the duration of a pass so two passes never overlap.
    pass_lock: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub healthy: usize,
    pub unhealthy: usize,
}

impl HealthMonitor {
    pub fn new(
        router: Arc<Router>,
        interval: Duration,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            router,
            interval,
            metrics,
            pass_lock: Mutex::new(()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Runs the initial pass, opens the router to traffic, then keeps probing
    /// every `interval` until `shutdown` is called. A pass that is already
    /// running when shutdown arrives is allowed to finish.
    pub async fn start(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();

        self.run_pass().await;
        self.router.mark_ready();

        info!("Starting health monitor with interval: {:?}", self.interval);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_pass().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Health monitor shutting down");
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Probes every endpoint concurrently and waits for all of them. Each
    /// result is committed as soon as its probe finishes.
    pub async fn run_pass(&self) -> PassSummary {
        let _pass = self.pass_lock.lock().await;
        // Stands in for the start time of any probe whose task dies.
        let pass_started = Utc::now();

        let tasks: Vec<_> = self
            .router
            .endpoints()
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, endpoint)| {
                let router = self.router.clone();
                let metrics = self.metrics.clone();
                tokio::spawn(async move {
                    let outcome = endpoint.probe().await;
                    router.record_probe(index, outcome).await;
                    report_probe(&endpoint, outcome, metrics.as_deref());
                    outcome.healthy
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;

        let (summary, lost) = tally(results, pass_started);
        for (index, outcome) in lost {
            self.router.record_probe(index, outcome).await;
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_endpoint_counts(summary.healthy, self.router.len());
        }

        info!(
            "Health check complete: {} healthy, {} unhealthy",
            summary.healthy, summary.unhealthy
        );
        summary
    }
}

/// Counts a pass's results. Tasks that died before committing get an
/// unhealthy outcome dated at the start of the pass, returned for the caller
/// to commit.
fn tally(
    results: Vec<Result<bool, JoinError>>,
    pass_started: DateTime<Utc>,
) -> (PassSummary, Vec<(usize, ProbeOutcome)>) {
    let mut summary = PassSummary::default();
    let mut lost = Vec::new();

    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(true) => summary.healthy += 1,
            Ok(false) => summary.unhealthy += 1,
            Err(e) => {
                error!(index, "Health probe task failed: {}", e);
                let outcome = ProbeOutcome {
                    healthy: false,
                    started_at: pass_started,
                };
                lost.push((index, outcome));
                summary.unhealthy += 1;
            }
        }
    }

    (summary, lost)
}

fn report_probe(endpoint: &Endpoint, outcome: ProbeOutcome, metrics: Option<&MetricsCollector>) {
    let address = endpoint.address();
    let stats = endpoint.stats();

    info!(
        endpoint = %address,
        healthy = outcome.healthy,
        requests = stats.requests,
        healthy_probes = stats.healthy_probes,
        unhealthy_probes = stats.unhealthy_probes,
        "health probe"
    );

    if let Some(metrics) = metrics {
        metrics.record_probe(&address, outcome.healthy);
    }
}
