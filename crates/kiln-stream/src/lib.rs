//! # kiln-stream
//!
//! Artifact detection and structuring for kiln.
//!
//! Generated text arrives in arbitrary fragments. [`StreamParser`] detects
//! `<artifact>` elements as they arrive, without ever re-scanning the buffer,
//! and hands each complete span to the structural parser which produces a
//! typed [`ArtifactBlock`](kiln_core::ArtifactBlock) and its validation
//! errors.
//!
//! ## Guarantees
//!
//! - Output depends only on the concatenated text, never on fragment boundaries
//! - `ArtifactDetected` for an id always precedes its `ArtifactCompleted`
//! - Raw payload sections are opaque: delimiters inside them are ignored
//! - A span that cannot be structured is reported and discarded; later
//!   artifacts in the same message are unaffected
//!
//! When a message holds no artifact element, renderable fenced code blocks
//! are promoted to artifacts with reduced confidence.

mod document;
mod events;
mod fallback;
mod markup;
mod matcher;
mod parser;
mod structure;

pub use document::{parse_document, parse_document_with, ParsedDocument};
pub use events::{EventBus, ListenerId, StreamEvent};
pub use fallback::fallback_blocks;
pub use parser::{ParserState, StreamParser};
pub use structure::{parse_artifact, synthesize_id, ArtifactHeader};
