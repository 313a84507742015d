//! Bounded retry gated by the circuit breaker
//!
//! Every attempt, the first included, must be allowed by the breaker. Each
//! attempt runs under a wall-clock timeout; a timed-out attempt is dropped
//! (its timer and future are released immediately) and reported as a failure.

use kiln_core::RetryConfig;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;

/// How a single attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptResult {
    Succeeded,
    Failed { message: String },
    TimedOut { after_ms: u64 },
}

/// Log entry for one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    #[serde(flatten)]
    pub result: AttemptResult,
    pub elapsed_ms: u64,
}

/// A successful value with the attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: Vec<AttemptRecord>,
}

/// Terminal failure of a retried operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// The breaker refused the attempt; callers should not retry on their own
    #[error("'{id}' is temporarily unavailable: circuit open, retry in {retry_after_ms}ms")]
    CircuitOpen {
        id: String,
        retry_after_ms: u64,
        attempts: Vec<AttemptRecord>,
    },

    /// Every allowed attempt failed
    #[error("all {} attempts failed for '{id}': {last_error}", .attempts.len())]
    Exhausted {
        id: String,
        last_error: String,
        attempts: Vec<AttemptRecord>,
    },

    /// There was nothing to attempt
    #[error("artifact '{id}' has no code to render")]
    NoCode { id: String },
}

impl RetryError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RetryError::CircuitOpen { .. })
    }

    /// Attempts made before the error, in order
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            RetryError::CircuitOpen { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                attempts
            }
            RetryError::NoCode { .. } => &[],
        }
    }
}

/// Retry wrapper around calls to an external collaborator
#[derive(Debug, Clone)]
pub struct RetryController {
    breaker: Arc<CircuitBreaker>,
    config: RetryConfig,
}

impl RetryController {
    pub fn new(breaker: Arc<CircuitBreaker>, config: RetryConfig) -> Self {
        Self { breaker, config }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before attempt `attempt` (1-based); zero before the first
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.config.backoff_multiplier.powi(attempt as i32 - 2);
        let ms = (self.config.initial_backoff_ms as f64 * factor).min(u64::MAX as f64);
        Duration::from_millis(ms as u64)
    }

    /// Run `operation` for `id` until it succeeds, the attempt budget runs
    /// out, or the breaker refuses.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(&self, id: &str, mut operation: F) -> Result<Attempted<T>, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let per_attempt = Duration::from_millis(self.config.per_attempt_timeout_ms);
        let mut attempts = Vec::new();
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_attempts {
            let delay = self.backoff_delay(attempt);
            if !delay.is_zero() {
                debug!("Backing off {:?} before attempt {} for {}", delay, attempt, id);
                tokio::time::sleep(delay).await;
            }

            if !self.breaker.allow_recovery_attempt(id) {
                let retry_after = self.breaker.time_until_retry(id);
                warn!("Attempt {} for {} refused: circuit open", attempt, id);
                return Err(RetryError::CircuitOpen {
                    id: id.to_string(),
                    retry_after_ms: retry_after.as_millis() as u64,
                    attempts,
                });
            }

            let started = Instant::now();
            let outcome = tokio::time::timeout(per_attempt, operation(attempt)).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(Ok(value)) => {
                    self.breaker.record_success(id);
                    info!("Attempt {} for {} succeeded", attempt, id);
                    attempts.push(AttemptRecord {
                        attempt,
                        result: AttemptResult::Succeeded,
                        elapsed_ms,
                    });
                    return Ok(Attempted { value, attempts });
                }
                Ok(Err(message)) => {
                    debug!("Attempt {} for {} failed: {}", attempt, id, message);
                    self.breaker.record_failure(id, &message);
                    last_error = message.clone();
                    AttemptResult::Failed { message }
                }
                Err(_) => {
                    let after_ms = self.config.per_attempt_timeout_ms;
                    warn!("Attempt {} for {} timed out after {}ms", attempt, id, after_ms);
                    last_error = format!("attempt timed out after {}ms", after_ms);
                    self.breaker.record_failure(id, &last_error);
                    AttemptResult::TimedOut { after_ms }
                }
            };
            attempts.push(AttemptRecord {
                attempt,
                result,
                elapsed_ms,
            });
        }

        Err(RetryError::Exhausted {
            id: id.to_string(),
            last_error,
            attempts,
        })
    }
}
