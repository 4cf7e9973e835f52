// src/load_balancer/mod.rs
mod router;

pub use router::{HealthState, Router};
