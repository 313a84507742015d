//! # kiln-recovery
//!
//! Bounded, per-artifact retry around an external render collaborator.
//!
//! - [`CircuitBreaker`]: CLOSED / OPEN / HALF_OPEN state per artifact id,
//!   held in one keyed map with per-key atomic updates
//! - [`RetryController`]: attempt budget, per-attempt timeout and backoff,
//!   gated by the breaker before every attempt
//! - [`ArtifactRecovery`]: render, repair after the first failure, retry
//!
//! A refusal by an open circuit surfaces as [`RetryError::CircuitOpen`],
//! distinct from ordinary exhausted retries, so callers can stop retrying
//! instead of hammering a broken artifact.

mod circuit_breaker;
mod clock;
mod recovery;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitRecord, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use recovery::{ArtifactRecovery, RecoveryReport, RenderOutcome, Renderer};
pub use retry::{AttemptRecord, AttemptResult, Attempted, RetryController, RetryError};
