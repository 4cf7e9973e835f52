//
// src/proxy/mod.rs
//
mod endpoint;
mod forwarder;

pub use endpoint::{Endpoint, StatsSnapshot};
pub use forwarder::{Forwarder, HttpClient, ProxyError};
