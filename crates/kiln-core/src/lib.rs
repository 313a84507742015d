//! # kiln-core
//!
//! Core types for the kiln artifact pipeline.
//!
//! Generated responses arrive as free-form text with self-contained artifact
//! elements embedded in them. The pipeline runs in four stages:
//!
//! - Detection: a chunk-safe stream parser finds artifact elements as fragments arrive
//! - Structuring: each complete element becomes a typed [`ArtifactBlock`]
//! - Repair: unresolved imports are rewritten from sibling blocks in the same message
//! - Bounded retry: a per-artifact circuit breaker caps automated render attempts
//!
//! This crate holds the data model shared by every stage, the unified error
//! type, configuration, and the code-fence scanner used by both the fallback
//! parser and the dependency lookup.

pub mod config;
mod error;
pub mod fence;
mod types;

pub use config::{CircuitConfig, KilnConfig, ResolutionConfig, RetryConfig, StreamConfig};
pub use error::{KilnError, Result};
pub use fence::{fenced_blocks, FencedBlock};
pub use types::*;
