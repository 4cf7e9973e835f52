// src/admission/mod.rs
mod fixed;
mod token_bucket;

pub use fixed::{AllowAll, DenyAll};
pub use token_bucket::TokenBucket;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Config key naming the algorithm.
pub const ALGO_KEY: &str = "algo";

/// Per-request yes/no decision keyed by a routing identity (usually the
/// client address). `Err` means the request must not be admitted.
#[async_trait]
pub trait AdmissionController: Send + Sync {
    async fn allow(&self, key: &str) -> Result<(), AdmissionError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("request from {0:?} not admitted")]
    Denied(String),

    #[error("unknown admission algorithm {0:?}")]
    UnknownAlgorithm(String),

    #[error("missing admission parameter {0:?}")]
    MissingParameter(&'static str),

    #[error("invalid admission parameter {key}={value:?}: {reason}")]
    InvalidParameter {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Builds the controller named by `algo`. Each algorithm validates its own
/// keys; a missing `algo` means always-allow.
pub fn from_config(
    params: &HashMap<String, String>,
) -> Result<Arc<dyn AdmissionController>, AdmissionError> {
    let algo = params.get(ALGO_KEY).map(String::as_str).unwrap_or("dummy");

    let controller: Arc<dyn AdmissionController> = match algo {
        "dummy" | "allow_all" => Arc::new(AllowAll),
        "deny_all" => Arc::new(DenyAll),
        "token_bucket" => Arc::new(TokenBucket::from_params(params)?),
        other => return Err(AdmissionError::UnknownAlgorithm(other.to_string())),
    };

    tracing::info!(algorithm = controller.name(), "Admission control configured");
    Ok(controller)
}
