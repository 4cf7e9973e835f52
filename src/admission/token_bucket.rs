// src/admission/token_bucket.rs
use super::{AdmissionController, AdmissionError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

pub const CAPACITY_KEY: &str = "bucket_capacity";
pub const INTERVAL_KEY: &str = "token_push_interval";

/// Full buckets are swept out once every this many admission checks.
pub const PRUNE_EVERY: u64 = 256;

/// Per-key token bucket. A key's bucket starts full, gains one token every
/// `push_interval` up to `capacity`, and each admitted request spends one.
pub struct TokenBucket {
    capacity: u64,
    push_interval: Duration,
    buckets: DashMap<String, Bucket>,
    checks: AtomicU64,
}

#[derive(Debug)]
struct Bucket {
    tokens: u64,
    last_push: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u64, push_interval: Duration) -> Result<Self, AdmissionError> {
        if capacity == 0 {
            return Err(AdmissionError::InvalidParameter {
                key: CAPACITY_KEY,
                value: capacity.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if push_interval.is_zero() {
            return Err(AdmissionError::InvalidParameter {
                key: INTERVAL_KEY,
                value: humantime::format_duration(push_interval).to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            capacity,
            push_interval,
            buckets: DashMap::new(),
            checks: AtomicU64::new(0),
        })
    }

    /// Reads `bucket_capacity` (integer) and `token_push_interval` (e.g.
    /// `1s`, `250ms`).
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, AdmissionError> {
        let raw_capacity = params
            .get(CAPACITY_KEY)
            .ok_or(AdmissionError::MissingParameter(CAPACITY_KEY))?;
        let capacity = raw_capacity
            .trim()
            .parse::<u64>()
            .map_err(|e| AdmissionError::InvalidParameter {
                key: CAPACITY_KEY,
                value: raw_capacity.clone(),
                reason: e.to_string(),
            })?;

        let raw_interval = params
            .get(INTERVAL_KEY)
            .ok_or(AdmissionError::MissingParameter(INTERVAL_KEY))?;
        let push_interval =
            humantime::parse_duration(raw_interval.trim()).map_err(|e| {
                AdmissionError::InvalidParameter {
                    key: INTERVAL_KEY,
                    value: raw_interval.clone(),
                    reason: e.to_string(),
                }
            })?;

        Self::new(capacity, push_interval)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn push_interval(&self) -> Duration {
        self.push_interval
    }

    /// Tokens currently held for `key` (a full bucket if it was never seen).
    pub fn available(&self, key: &str) -> u64 {
        match self.buckets.get_mut(key) {
            Some(mut bucket) => {
                self.refill(&mut bucket, Instant::now());
                bucket.tokens
            }
            None => self.capacity,
        }
    }

    /// Number of keys currently holding a bucket.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    /// Drops every bucket that has refilled to capacity. A full bucket
    /// admits exactly like a missing one, so nothing is lost.
    pub fn prune(&self) {
        let now = Instant::now();
        self.buckets.retain(|_, bucket| {
            self.refill(bucket, now);
            bucket.tokens < self.capacity
        });
    }

    fn try_take(&self, key: &str) -> bool {
        // Must run before `entry` below takes a shard lock.
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            self.prune();
        }

        let now = Instant::now();
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_push: now,
        });

        self.refill(&mut bucket, now);
        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_push);
        let pushes = elapsed.as_nanos() / self.push_interval.as_nanos();
        if pushes == 0 {
            return;
        }

        if bucket.tokens >= self.capacity {
            // Full buckets don't bank time.
            bucket.last_push = now;
            return;
        }

        let missing = u128::from(self.capacity - bucket.tokens);
        let added = pushes.min(missing);
        bucket.tokens += added as u64;
        bucket.last_push = if added == missing {
            now
        } else {
            bucket.last_push + self.push_interval * u32::try_from(added).unwrap_or(u32::MAX)
        };
    }
}

#[async_trait]
impl AdmissionController for TokenBucket {
    async fn allow(&self, key: &str) -> Result<(), AdmissionError> {
        if self.try_take(key) {
            Ok(())
        } else {
            tracing::debug!(key, "token bucket empty");
            Err(AdmissionError::Denied(key.to_string()))
        }
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}
