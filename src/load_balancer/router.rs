// src/load_balancer/router.rs
use crate::config::ConfigError;
use crate::health::ProbeOutcome;
use crate::proxy::Endpoint;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health of one endpoint as last committed by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthState {
    pub is_healthy: bool,
    pub last_health_check: DateTime<Utc>,
}

impl HealthState {
    /// Unhealthy, with a check time far enough back to read as "never".
    fn never_checked() -> Self {
        Self {
            is_healthy: false,
            last_health_check: Utc::now() - Duration::days(100 * 365),
        }
    }
}

/// Fixed, ordered endpoint pool with strict round-robin selection over the
/// endpoints currently marked healthy.
///
/// Health flags are only ever read and written under `health`; the cursor is
/// advanced atomically and always stays in `[0, len)`.
pub struct Router {
    endpoints: Vec<Arc<Endpoint>>,
    health: RwLock<Vec<HealthState>>,
    cursor: AtomicUsize,
    can_serve: AtomicBool,
}

impl Router {
    pub fn new(endpoints: Vec<Arc<Endpoint>>) -> Result<Self, ConfigError> {
        if endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }

        let health = vec![HealthState::never_checked(); endpoints.len()];
        Ok(Self {
            endpoints,
            health: RwLock::new(health),
            cursor: AtomicUsize::new(0),
            can_serve: AtomicBool::new(false),
        })
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Index the next selection attempt will start from.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.can_serve.load(Ordering::Acquire)
    }

    /// Opens the router to traffic. There is no way back to not-ready.
    pub fn mark_ready(&self) {
        if !self.can_serve.swap(true, Ordering::AcqRel) {
            tracing::info!("Load balancer can start serving");
        }
    }

    /// Scans at most `len` positions from the cursor and returns the first
    /// healthy endpoint. The cursor moves on every attempt, hit or miss.
    pub async fn select_endpoint(&self) -> Option<Arc<Endpoint>> {
        let health = self.health.read().await;

        for _ in 0..self.endpoints.len() {
            let index = self.advance_cursor();
            if health[index].is_healthy {
                return Some(self.endpoints[index].clone());
            }
        }

        tracing::warn!(endpoints = self.endpoints.len(), "No healthy endpoints found");
        None
    }

    /// Commits a probe result for the endpoint at `index`.
    pub async fn record_probe(&self, index: usize, outcome: ProbeOutcome) {
        let mut health = self.health.write().await;
        if let Some(state) = health.get_mut(index) {
            state.is_healthy = outcome.healthy;
            state.last_health_check = outcome.started_at;
        }
    }

    pub async fn health_of(&self, index: usize) -> Option<HealthState> {
        self.health.read().await.get(index).copied()
    }

    pub async fn healthy_count(&self) -> usize {
        self.health
            .read()
            .await
            .iter()
            .filter(|state| state.is_healthy)
            .count()
    }

    fn advance_cursor(&self) -> usize {
        let len = self.endpoints.len();
        self.cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some((current + 1) % len)
            })
            .unwrap_or_else(|previous| previous)
    }
}
