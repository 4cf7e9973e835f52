// src/health/mod.rs
mod checker;
mod probe;

pub use checker::{HealthMonitor, PassSummary};
pub use probe::{ProbeClient, ProbeOutcome};
