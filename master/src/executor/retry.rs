//! Bounded exponential backoff for per-tablet operations

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::retry as defaults;
use crate::errors::{ConfigError, ErrorKind, MasterError, Result, TabletError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            initial_backoff_ms: defaults::INITIAL_BACKOFF_MS,
            max_backoff_ms: defaults::MAX_BACKOFF_MS,
            multiplier: defaults::MULTIPLIER,
        }
    }
}

/// Result of driving one tablet operation through a [`RetryPolicy`]
#[derive(Debug)]
pub struct Attempted<T> {
    pub attempts: u32,
    pub result: Result<T>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let delay = delay.min(self.max_backoff_ms as f64);
        Duration::from_millis(delay as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.multiplier".to_string(),
                reason: format!("must be at least 1.0, got {}", self.multiplier),
            }
            .into());
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_backoff_ms".to_string(),
                reason: "must be greater than or equal to initial_backoff_ms".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Exhaustion is reported as
    /// [`TabletError::RetriesExhausted`].
    pub async fn run<T, F, Fut>(&self, tablet_id: &str, operation: &str, mut op: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => {
                    return Attempted {
                        attempts: attempt,
                        result: Ok(value),
                    }
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                debug!(
                    "{} on tablet {} failed permanently on attempt {}: {}",
                    operation, tablet_id, attempt, err
                );
                return Attempted {
                    attempts: attempt,
                    result: Err(err),
                };
            }

            if attempt >= max_attempts {
                warn!(
                    "{} on tablet {} exhausted {} attempts: {}",
                    operation, tablet_id, attempt, err
                );
                return Attempted {
                    attempts: attempt,
                    result: Err(MasterError::Tablet(TabletError::RetriesExhausted {
                        tablet_id: tablet_id.to_string(),
                        operation: operation.to_string(),
                        attempts: attempt,
                        reason: transient_reason(&err),
                    })),
                };
            }

            let delay = self.delay_for(attempt - 1);
            debug!(
                "{} on tablet {} attempt {}/{} failed: {}; retrying in {:?}",
                operation, tablet_id, attempt, max_attempts, err, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl RetryPolicy {
    /// Run a local state write under the same backoff. Storage failures are
    /// retried; domain errors such as an illegal transition return at once.
    pub async fn persist<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.kind() != ErrorKind::Internal || attempt >= max_attempts => {
                    warn!("Persisting {} failed after {} attempts: {}", what, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt - 1);
                    debug!(
                        "Persisting {} attempt {}/{} failed: {}; retrying in {:?}",
                        what, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn transient_reason(err: &MasterError) -> String {
    match err {
        MasterError::Tablet(TabletError::Unavailable { reason, .. }) => reason.clone(),
        other => other.to_string(),
    }
}
