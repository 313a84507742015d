//! One-shot parsing of a complete message
//!
//! A complete message is parsed by feeding it to a [`StreamParser`] as a
//! single fragment, so one-shot and streamed results never diverge.

use kiln_core::{ArtifactBlock, ParseFailure, Provenance, StreamConfig};
use serde::Serialize;

use crate::events::StreamEvent;
use crate::parser::StreamParser;

/// Everything extracted from one message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedDocument {
    /// Artifacts in document order, invalid ones included
    pub blocks: Vec<ArtifactBlock>,
    /// Spans that could not be structured at all
    pub failures: Vec<ParseFailure>,
    /// Message text outside artifact elements
    pub prose: String,
}

impl ParsedDocument {
    pub fn find(&self, id: &str) -> Option<&ArtifactBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Whether the blocks came from fenced code rather than artifact elements
    pub fn used_fallback(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| b.provenance == Provenance::FencedBlock)
    }

    pub fn valid_blocks(&self) -> impl Iterator<Item = &ArtifactBlock> {
        self.blocks.iter().filter(|b| b.valid)
    }
}

/// Parse a complete message with default settings
pub fn parse_document(text: &str) -> ParsedDocument {
    parse_document_with(text, StreamConfig::default())
}

/// Parse a complete message
pub fn parse_document_with(text: &str, config: StreamConfig) -> ParsedDocument {
    let mut parser = StreamParser::with_stream_id("document", config);

    let mut events = match parser.feed(text) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!("Document parse rejected input: {}", e);
            return ParsedDocument::default();
        }
    };
    match parser.finish() {
        Ok(more) => events.extend(more),
        Err(e) => tracing::warn!("Document parse did not finish cleanly: {}", e),
    }

    let mut document = ParsedDocument {
        prose: parser.prose().to_string(),
        ..ParsedDocument::default()
    };
    for event in events {
        match event {
            StreamEvent::ArtifactCompleted { block, .. } => {
                document.blocks.push(std::sync::Arc::unwrap_or_clone(block));
            }
            StreamEvent::ParseFailed { failure, .. } => document.failures.push(failure),
            _ => {}
        }
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{ContentType, ParseFailureKind, ValidationErrorKind};

    #[test]
    fn test_parse_document_collects_blocks_and_prose() {
        let text = concat!(
            "Intro\n",
            r#"<artifact identifier="a" type="text/html" title="A"><files><file path="index.html"><![CDATA[<p>a</p>]]></file></files></artifact>"#,
            "\nMiddle\n",
            r#"<artifact identifier="b" type="svg"><files><file path="b.svg"><![CDATA[<rect/>]]></file></files></artifact>"#,
            "\nEnd"
        );
        let doc = parse_document(text);

        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(doc.find("a").unwrap().content_type, ContentType::Html);
        assert!(doc.find("a").unwrap().valid);
        assert!(doc.find("b").unwrap().has_error(ValidationErrorKind::SyntaxError));
        assert_eq!(doc.valid_blocks().count(), 1);
        assert_eq!(doc.prose, "Intro\n\nMiddle\n\nEnd");
        assert!(!doc.used_fallback());
    }

    #[test]
    fn test_parse_document_reports_unterminated() {
        let doc = parse_document("x <artifact identifier=\"cut\" type=\"code\"><files>");
        assert!(doc.blocks.is_empty());
        assert_eq!(doc.failures.len(), 1);
        assert_eq!(doc.failures[0].kind, ParseFailureKind::UnterminatedStream);
        assert_eq!(doc.failures[0].offset, 2);
    }

    #[test]
    fn test_parse_document_fallback() {
        let doc = parse_document("Here:\n```html\n<b>hi</b>\n```\n");
        assert!(doc.used_fallback());
        assert_eq!(doc.blocks[0].id, "fallback-1");
        assert_eq!(doc.blocks[0].code(), Some("<b>hi</b>"));
    }

    #[test]
    fn test_empty_document() {
        let doc = parse_document("");
        assert_eq!(doc, ParsedDocument::default());
    }
}
