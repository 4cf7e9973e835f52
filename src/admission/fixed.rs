// src/admission/fixed.rs
use super::{AdmissionController, AdmissionError};
use async_trait::async_trait;

/// Admits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AdmissionController for AllowAll {
    async fn allow(&self, _key: &str) -> Result<(), AdmissionError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "allow_all"
    }
}

/// Admits nothing. Useful for draining a balancer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl AdmissionController for DenyAll {
    async fn allow(&self, key: &str) -> Result<(), AdmissionError> {
        Err(AdmissionError::Denied(key.to_string()))
    }

    fn name(&self) -> &'static str {
        "deny_all"
    }
}
