// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Text exposition of everything registered. Encoding failures yield an
    /// empty body rather than taking the metrics endpoint down.
    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            buffer.clear();
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub responses_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub admission_denied_total: IntCounter,
    pub no_healthy_endpoint_total: IntCounter,

    // Endpoint metrics
    pub endpoint_requests_total: IntCounterVec,
    pub endpoint_probes_total: IntCounterVec,
    pub endpoint_health_status: IntGaugeVec,

    // Pool metrics
    pub healthy_endpoints: IntGauge,
    pub total_endpoints: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let responses_total = IntCounterVec::new(
            Opts::new("lb_responses_total", "Responses sent to clients"),
            &["method", "status_code"],
        )?;
        registry.register(Box::new(responses_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Request duration in seconds",
            ),
            &["method", "status_code"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let admission_denied_total = IntCounter::new(
            "lb_admission_denied_total",
            "Requests rejected by admission control",
        )?;
        registry.register(Box::new(admission_denied_total.clone()))?;

        let no_healthy_endpoint_total = IntCounter::new(
            "lb_no_healthy_endpoint_total",
            "Requests rejected because no endpoint was healthy",
        )?;
        registry.register(Box::new(no_healthy_endpoint_total.clone()))?;

        let endpoint_requests_total = IntCounterVec::new(
            Opts::new("lb_endpoint_requests_total", "Requests forwarded per endpoint"),
            &["endpoint"],
        )?;
        registry.register(Box::new(endpoint_requests_total.clone()))?;

        let endpoint_probes_total = IntCounterVec::new(
            Opts::new("lb_endpoint_probes_total", "Health probes per endpoint"),
            &["endpoint", "outcome"],
        )?;
        registry.register(Box::new(endpoint_probes_total.clone()))?;

        let endpoint_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_endpoint_health_status",
                "Endpoint health status (1=healthy, 0=unhealthy)",
            ),
            &["endpoint"],
        )?;
        registry.register(Box::new(endpoint_health_status.clone()))?;

        let healthy_endpoints =
            IntGauge::new("lb_healthy_endpoints", "Number of healthy endpoints")?;
        registry.register(Box::new(healthy_endpoints.clone()))?;

        let total_endpoints = IntGauge::new("lb_total_endpoints", "Total number of endpoints")?;
        registry.register(Box::new(total_endpoints.clone()))?;

        Ok(Self {
            responses_total,
            request_duration_seconds,
            admission_denied_total,
            no_healthy_endpoint_total,
            endpoint_requests_total,
            endpoint_probes_total,
            endpoint_health_status,
            healthy_endpoints,
            total_endpoints,
        })
    }

    pub fn record_response(&self, method: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.responses_total
            .with_label_values(&[method, &status])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[method, &status])
            .observe(duration.as_secs_f64());
    }

    pub fn record_forward(&self, endpoint: &str) {
        self.endpoint_requests_total
            .with_label_values(&[endpoint])
            .inc();
    }

    pub fn record_admission_denied(&self) {
        self.admission_denied_total.inc();
    }

    pub fn record_no_healthy_endpoint(&self) {
        self.no_healthy_endpoint_total.inc();
    }

    pub fn record_probe(&self, endpoint: &str, healthy: bool) {
        let outcome = if healthy { "healthy" } else { "unhealthy" };
        self.endpoint_probes_total
            .with_label_values(&[endpoint, outcome])
            .inc();

        self.endpoint_health_status
            .with_label_values(&[endpoint])
            .set(i64::from(healthy));
    }

    pub fn update_endpoint_counts(&self, healthy: usize, total: usize) {
        self.healthy_endpoints.set(healthy as i64);
        self.total_endpoints.set(total as i64);
    }
}

// Helper for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
