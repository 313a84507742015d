//! Per-artifact circuit breaker
//!
//! Bounds automated render/repair attempts for each artifact identifier
//! independently. Every read-modify-write of a record happens under its map
//! entry, so racing reports for one identifier cannot lose an update and
//! unrelated identifiers never contend.
//!
//! Transitions are evaluated lazily when a record is touched; there is no
//! background timer.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kiln_core::CircuitConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{elapsed_ms, Clock, SystemClock};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - attempts allowed
    Closed,
    /// Too many failures - attempts refused
    Open,
    /// Reset timeout elapsed - one trial attempt allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Failure history of one artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitRecord {
    pub state: CircuitState,
    /// Failures since the circuit last closed
    pub failure_count: u32,
    /// Successes since the circuit last closed
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Start of the current open window
    pub opened_at: Option<DateTime<Utc>>,
    /// When the granted half-open trial started
    pub trial_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl CircuitRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            opened_at: None,
            trial_started_at: None,
            last_error: None,
        }
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.opened_at = None;
        self.trial_started_at = None;
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_started_at = None;
    }
}

impl Default for CircuitRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyed circuit breaker shared by every pipeline in the process
///
/// # Example
///
/// ```
/// use kiln_core::CircuitConfig;
/// use kiln_recovery::{CircuitBreaker, CircuitState};
///
/// let breaker = CircuitBreaker::new(CircuitConfig::default());
///
/// breaker.record_failure("chart", "render crashed");
/// breaker.record_failure("chart", "render crashed");
/// breaker.record_failure("chart", "render crashed");
///
/// assert_eq!(breaker.get_circuit_state("chart"), CircuitState::Open);
/// assert!(!breaker.allow_recovery_attempt("chart"));
/// assert!(breaker.allow_recovery_attempt("table"));
/// ```
pub struct CircuitBreaker {
    records: DashMap<String, CircuitRecord>,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a breaker driven by an injected clock
    pub fn with_clock(config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Run `f` on the record for `id` after applying due transitions
    fn with_record<T>(&self, id: &str, f: impl FnOnce(&mut CircuitRecord, DateTime<Utc>) -> T) -> T {
        let now = self.clock.now();
        let mut record = self.records.entry(id.to_string()).or_default();
        self.refresh(id, &mut *record, now);
        f(&mut *record, now)
    }

    /// OPEN becomes HALF_OPEN once the reset timeout has elapsed
    fn refresh(&self, id: &str, record: &mut CircuitRecord, now: DateTime<Utc>) {
        if record.state != CircuitState::Open {
            return;
        }
        let Some(opened_at) = record.opened_at else {
            return;
        };
        if elapsed_ms(now, opened_at) >= self.config.reset_timeout_ms {
            debug!("Circuit for {} half-open after {}ms", id, self.config.reset_timeout_ms);
            record.state = CircuitState::HalfOpen;
            record.trial_started_at = None;
        }
    }

    /// Whether an automated attempt for `id` may run now.
    ///
    /// In HALF_OPEN exactly one trial is granted. If that trial reports no
    /// outcome within the half-open timeout it is presumed lost and a new
    /// trial is granted.
    pub fn allow_recovery_attempt(&self, id: &str) -> bool {
        self.with_record(id, |record, now| match record.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => match record.trial_started_at {
                None => {
                    record.trial_started_at = Some(now);
                    true
                }
                Some(started) if elapsed_ms(now, started) >= self.config.half_open_timeout_ms => {
                    warn!("Half-open trial for {} never reported, granting another", id);
                    record.trial_started_at = Some(now);
                    true
                }
                Some(_) => false,
            },
        })
    }

    /// Report a successful attempt. Closes the circuit from any state.
    pub fn record_success(&self, id: &str) {
        self.with_record(id, |record, _| {
            if record.state != CircuitState::Closed {
                info!("Circuit for {} closed after successful attempt", id);
                record.close();
            }
            record.failure_count = 0;
            record.success_count += 1;
        })
    }

    /// Report a failed attempt
    pub fn record_failure(&self, id: &str, message: &str) {
        let threshold = self.config.failure_threshold;
        self.with_record(id, |record, now| {
            record.failure_count += 1;
            record.last_failure_time = Some(now);
            record.last_error = Some(message.to_string());

            match record.state {
                CircuitState::Closed if record.failure_count >= threshold => {
                    warn!(
                        "Circuit for {} opened after {} failures: {}",
                        id, record.failure_count, message
                    );
                    record.open(now);
                }
                CircuitState::HalfOpen => {
                    warn!("Half-open trial for {} failed, reopening: {}", id, message);
                    record.open(now);
                }
                _ => {}
            }
        })
    }

    /// Current state, applying any due transition
    pub fn get_circuit_state(&self, id: &str) -> CircuitState {
        self.with_record(id, |record, _| record.state)
    }

    /// Force `id` back to CLOSED with fresh counters
    pub fn reset_circuit(&self, id: &str) {
        info!("Circuit for {} manually reset", id);
        self.records.insert(id.to_string(), CircuitRecord::new());
    }

    /// Snapshot of the record for `id`
    pub fn get_metrics(&self, id: &str) -> CircuitRecord {
        self.with_record(id, |record, _| record.clone())
    }

    /// Time until `id` may be attempted again; zero when an attempt is allowed now
    pub fn time_until_retry(&self, id: &str) -> Duration {
        let remaining = self.with_record(id, |record, now| match record.state {
            CircuitState::Closed => 0,
            CircuitState::Open => record
                .opened_at
                .map(|t| self.config.reset_timeout_ms.saturating_sub(elapsed_ms(now, t)))
                .unwrap_or(0),
            CircuitState::HalfOpen => record
                .trial_started_at
                .map(|t| {
                    self.config
                        .half_open_timeout_ms
                        .saturating_sub(elapsed_ms(now, t))
                })
                .unwrap_or(0),
        });
        Duration::from_millis(remaining)
    }

    /// Identifiers with a record
    pub fn tracked_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Forget `id` entirely
    pub fn remove(&self, id: &str) -> Option<CircuitRecord> {
        self.records.remove(id).map(|(_, record)| record)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("tracked", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(threshold: u32) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::default();
        let config = CircuitConfig {
            failure_threshold: threshold,
            reset_timeout_ms: 1_000,
            half_open_timeout_ms: 500,
        };
        (CircuitBreaker::with_clock(config, Arc::new(clock.clone())), clock)
    }

    fn trip(cb: &CircuitBreaker, id: &str) {
        for _ in 0..cb.config().failure_threshold {
            cb.record_failure(id, "boom");
        }
    }

    #[test]
    fn test_initial_state_closed() {
        let (cb, _) = breaker(3);
        assert_eq!(cb.get_circuit_state("a"), CircuitState::Closed);
        assert!(cb.allow_recovery_attempt("a"));
        assert_eq!(cb.tracked_ids(), vec!["a"]);
    }

    #[test]
    fn test_opens_after_threshold() {
        let (cb, _) = breaker(3);

        cb.record_failure("a", "one");
        assert_eq!(cb.get_circuit_state("a"), CircuitState::Closed);
        cb.record_failure("a", "two");
        assert_eq!(cb.get_circuit_state("a"), CircuitState::Closed);
        cb.record_failure("a", "three");
        assert_eq!(cb.get_circuit_state("a"), CircuitState::Open);
        assert!(!cb.allow_recovery_attempt("a"));

        let metrics = cb.get_metrics("a");
        assert_eq!(metrics.failure_count, 3);
        assert_eq!(metrics.last_error.as_deref(), Some("three"));
        assert!(metrics.opened_at.is_some());
    }

    #[test]
    fn test_success_resets_failures() {
        let (cb, _) = breaker(3);

        cb.record_failure("a", "x");
        cb.record_failure("a", "x");
        assert_eq!(cb.get_metrics("a").failure_count, 2);

        cb.record_success("a");
        let metrics = cb.get_metrics("a");
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.state, CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_reset_timeout() {
        let (cb, clock) = breaker(2);
        trip(&cb, "a");

        clock.advance(999);
        assert_eq!(cb.get_circuit_state("a"), CircuitState::Open);
        assert_eq!(cb.time_until_retry("a"), Duration::from_millis(1));

        clock.advance(1);
        assert!(cb.allow_recovery_attempt("a"));
        assert_eq!(cb.get_circuit_state("a"), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_grants_single_trial() {
        let (cb, clock) = breaker(2);
        trip(&cb, "a");
        clock.advance(1_000);

        assert!(cb.allow_recovery_attempt("a"));
        assert!(!cb.allow_recovery_attempt("a"));

        clock.advance(500);
        assert!(cb.allow_recovery_attempt("a"), "lost trial is replaced");
        assert!(!cb.allow_recovery_attempt("a"));
    }

    #[test]
    fn test_half_open_success_closes() {
        let (cb, clock) = breaker(2);
        trip(&cb, "a");
        clock.advance(1_000);
        assert!(cb.allow_recovery_attempt("a"));

        cb.record_success("a");
        let metrics = cb.get_metrics("a");
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.failure_count, 0);
        assert!(metrics.opened_at.is_none());
        assert!(cb.allow_recovery_attempt("a"));
    }

    #[test]
    fn test_half_open_failure_restarts_window() {
        let (cb, clock) = breaker(2);
        trip(&cb, "a");
        let first_open = cb.get_metrics("a").opened_at.unwrap();

        clock.advance(1_000);
        assert!(cb.allow_recovery_attempt("a"));
        cb.record_failure("a", "still broken");

        let metrics = cb.get_metrics("a");
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(elapsed_ms(metrics.opened_at.unwrap(), first_open), 1_000);
        assert_eq!(cb.time_until_retry("a"), Duration::from_millis(1_000));

        clock.advance(999);
        assert!(!cb.allow_recovery_attempt("a"));
    }

    #[test]
    fn test_failure_while_open_keeps_window() {
        let (cb, clock) = breaker(2);
        trip(&cb, "a");
        let opened_at = cb.get_metrics("a").opened_at;

        clock.advance(600);
        cb.record_failure("a", "late report");
        assert_eq!(cb.get_metrics("a").opened_at, opened_at);

        clock.advance(400);
        assert_eq!(cb.get_circuit_state("a"), CircuitState::HalfOpen);
    }

    #[test]
    fn test_identifiers_are_isolated() {
        let (cb, _) = breaker(1);
        cb.record_failure("a", "x");
        assert_eq!(cb.get_circuit_state("a"), CircuitState::Open);
        assert_eq!(cb.get_circuit_state("b"), CircuitState::Closed);
        assert!(cb.allow_recovery_attempt("b"));
    }

    #[test]
    fn test_empty_identifier_is_an_ordinary_key() {
        let (cb, _) = breaker(2);
        assert_eq!(cb.get_circuit_state(""), CircuitState::Closed);
        assert!(cb.allow_recovery_attempt(""));

        trip(&cb, "");
        cb.record_failure("", "");
        assert_eq!(cb.get_circuit_state(""), CircuitState::Open);
        assert_eq!(cb.get_metrics("").last_error.as_deref(), Some(""));
        assert_eq!(cb.get_circuit_state("a"), CircuitState::Closed);

        cb.reset_circuit("");
        assert!(cb.allow_recovery_attempt(""));
        assert_eq!(cb.tracked_ids(), vec!["".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_manual_reset_and_remove() {
        let (cb, _) = breaker(1);
        cb.record_failure("a", "x");
        cb.reset_circuit("a");
        assert_eq!(cb.get_metrics("a"), CircuitRecord::default());

        assert!(cb.remove("a").is_some());
        assert!(cb.tracked_ids().is_empty());
        assert!(cb.remove("a").is_none());
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let cb = Arc::new(CircuitBreaker::new(CircuitConfig {
            failure_threshold: 1_000,
            ..CircuitConfig::default()
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        cb.record_failure("shared", "race");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cb.get_metrics("shared").failure_count, 400);
    }
}
