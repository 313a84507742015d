//! Chunk-safe incremental artifact parser
//!
//! Consumes a message as an ordered sequence of fragments and detects
//! artifact elements without re-scanning from the start. All text lands in a
//! single growing buffer; a cursor marks how far it has been examined.
//!
//! ```text
//! SCANNING ──'<'──▶ TAG_MATCHING ──"<artifact"+ws──▶ ATTR_PARSING ──'>'──▶ BODY
//!    ▲                  │ contradiction                                 │  ▲
//!    │◀─────────────────┘ (prefix flushed as prose)      "<![CDATA[" ─┘  │ "]]>"
//!    │                                                       CDATA_GUARD ─┘
//!    └──── COMPLETE ◀── depth-zero "</artifact>" ── BODY
//!
//! finish() while in ATTR_PARSING / BODY / CDATA_GUARD ──▶ UNTERMINATED
//! ```
//!
//! Every decision is made one character at a time and partial delimiter
//! matches are carried across fragment boundaries, so the events produced
//! depend only on the concatenated text, never on how it was cut.

use kiln_core::{KilnError, ParseFailure, ParseFailureKind, Result, StreamConfig};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::{EventBus, ListenerId, StreamEvent};
use crate::fallback::fallback_blocks;
use crate::markup::{is_tag_boundary, ARTIFACT_CLOSE, ARTIFACT_OPEN, CDATA_CLOSE, CDATA_OPEN};
use crate::matcher::DelimiterMatcher;
use crate::structure::{parse_artifact_with, ArtifactHeader};

/// Parser FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserState {
    /// Ordinary content
    Scanning,
    /// A candidate `<artifact` is being accumulated and may still fail
    TagMatching,
    /// Collecting the open tag up to its `>`
    AttrParsing,
    /// Inside the element, tracking nesting depth
    Body,
    /// Inside a raw payload; everything is opaque until `]]>`
    CdataGuard,
    /// The depth-zero close was found and the span handed off
    Complete,
    /// The stream ended inside an artifact
    Unterminated,
}

impl ParserState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserState::Scanning => "SCANNING",
            ParserState::TagMatching => "TAG_MATCHING",
            ParserState::AttrParsing => "ATTR_PARSING",
            ParserState::Body => "BODY",
            ParserState::CdataGuard => "CDATA_GUARD",
            ParserState::Complete => "COMPLETE",
            ParserState::Unterminated => "UNTERMINATED",
        }
    }
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress through an `<artifact` open tag met inside a body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NestedTag {
    None,
    /// `<artifact` matched; the next character decides whether it is a tag
    Boundary,
    /// Inside the nested open tag. `slash` is set while the last significant
    /// character was an unquoted `/`.
    Open { quote: Option<char>, slash: bool },
}

/// Incremental parser for one message stream
pub struct StreamParser {
    stream_id: String,
    config: StreamConfig,
    state: ParserState,

    buffer: String,
    cursor: usize,
    /// Candidate open tag text, from `<` up to (not including) `>`
    pending: String,
    quote: Option<char>,
    prose: String,

    open_matcher: DelimiterMatcher,
    close_matcher: DelimiterMatcher,
    cdata_open: DelimiterMatcher,
    cdata_close: DelimiterMatcher,
    nested: NestedTag,
    depth: usize,

    span_start: usize,
    current: Option<ArtifactHeader>,
    spans_opened: usize,
    /// Identifiers already announced in this message
    ids: HashSet<String>,
    completed: usize,
    failures: Vec<ParseFailure>,

    fed_any: bool,
    finished: bool,
    bus: EventBus,
    outbox: Vec<StreamEvent>,
}

impl StreamParser {
    /// Create a parser with a fresh random stream id
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        Self::with_stream_id(uuid::Uuid::new_v4().to_string(), config)
    }

    /// Create a parser whose events are scoped to `stream_id`
    pub fn with_stream_id(stream_id: impl Into<String>, config: StreamConfig) -> Self {
        Self {
            stream_id: stream_id.into(),
            config,
            state: ParserState::Scanning,
            buffer: String::new(),
            cursor: 0,
            pending: String::new(),
            quote: None,
            prose: String::new(),
            open_matcher: DelimiterMatcher::new(ARTIFACT_OPEN),
            close_matcher: DelimiterMatcher::new(ARTIFACT_CLOSE),
            cdata_open: DelimiterMatcher::new(CDATA_OPEN),
            cdata_close: DelimiterMatcher::new(CDATA_CLOSE),
            nested: NestedTag::None,
            depth: 0,
            span_start: 0,
            current: None,
            spans_opened: 0,
            ids: HashSet::new(),
            completed: 0,
            failures: Vec::new(),
            fed_any: false,
            finished: false,
            bus: EventBus::new(),
            outbox: Vec::new(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Everything fed so far
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Byte offset up to which the buffer has been examined
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Unresolved candidate open-tag text held back from the prose
    pub fn pending_prefix(&self) -> &str {
        &self.pending
    }

    /// Characters of a body delimiter matched at the end of the buffer
    pub fn pending_delimiter_len(&self) -> usize {
        match self.state {
            ParserState::Body => self
                .close_matcher
                .matched()
                .max(self.open_matcher.matched())
                .max(self.cdata_open.matched()),
            ParserState::CdataGuard => self.cdata_close.matched(),
            _ => 0,
        }
    }

    /// Message text outside artifacts
    pub fn prose(&self) -> &str {
        &self.prose
    }

    /// Current nesting depth inside an artifact body
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Artifacts completed so far in this message
    pub fn completed_count(&self) -> usize {
        self.completed
    }

    /// Spans discarded so far
    pub fn failures(&self) -> &[ParseFailure] {
        &self.failures
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Register an event callback
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    /// Register an event channel
    pub fn subscribe_channel(&mut self) -> (ListenerId, mpsc::UnboundedReceiver<StreamEvent>) {
        self.bus.subscribe_channel()
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Feed the next fragment.
    ///
    /// Returns the events raised while consuming it; the same events have
    /// already been delivered to subscribers, in the same order.
    pub fn feed(&mut self, fragment: &str) -> Result<Vec<StreamEvent>> {
        if self.finished {
            return Err(KilnError::StreamFinished(self.stream_id.clone()));
        }
        self.fed_any = true;

        let start = self.buffer.len();
        self.buffer.push_str(fragment);
        let chars: Vec<(usize, char)> = self.buffer[start..]
            .char_indices()
            .map(|(i, c)| (start + i, c))
            .collect();

        for (pos, c) in chars {
            self.step(pos, c);
        }
        self.cursor = self.buffer.len();

        Ok(std::mem::take(&mut self.outbox))
    }

    /// Feed a last fragment and finish the stream
    pub fn finish_with(&mut self, fragment: &str) -> Result<Vec<StreamEvent>> {
        let mut events = self.feed(fragment)?;
        events.extend(self.finish()?);
        Ok(events)
    }

    /// Signal that no further fragments will arrive.
    ///
    /// A pending candidate tag is flushed as prose. An artifact still open is
    /// discarded as unterminated. When no artifact element completed, fenced
    /// code blocks are promoted to fallback artifacts.
    pub fn finish(&mut self) -> Result<Vec<StreamEvent>> {
        if self.finished {
            return Err(KilnError::StreamFinished(self.stream_id.clone()));
        }
        if !self.fed_any {
            return Err(KilnError::EmptyStream);
        }

        match self.state {
            ParserState::TagMatching => {
                let pending = std::mem::take(&mut self.pending);
                self.prose.push_str(&pending);
                self.transition(ParserState::Scanning);
            }
            ParserState::AttrParsing | ParserState::Body | ParserState::CdataGuard => {
                let from = self.state;
                self.transition(ParserState::Unterminated);

                let mut failure = ParseFailure::new(
                    ParseFailureKind::UnterminatedStream,
                    format!("stream ended in {} before the closing delimiter", from),
                    self.span_start,
                );
                if let Some(header) = self.current.take() {
                    failure = failure.with_artifact_id(header.id);
                }
                warn!("Discarding unterminated artifact in stream {}: {}", self.stream_id, failure);
                self.pending.clear();
                self.reject(failure);
            }
            _ => {}
        }

        if self.completed == 0 && self.config.fallback_enabled {
            let blocks = fallback_blocks(&self.buffer, self.config.fallback_confidence);
            if !blocks.is_empty() {
                debug!(
                    "No artifact elements in stream {}; promoting {} fenced blocks",
                    self.stream_id,
                    blocks.len()
                );
            }
            for block in blocks {
                self.emit(StreamEvent::ArtifactDetected {
                    stream_id: self.stream_id.clone(),
                    id: block.id.clone(),
                    content_type: block.content_type,
                    title: block.title.clone(),
                });
                self.completed += 1;
                self.emit(StreamEvent::ArtifactCompleted {
                    stream_id: self.stream_id.clone(),
                    block: Arc::new(block),
                });
            }
        }

        self.finished = true;
        Ok(std::mem::take(&mut self.outbox))
    }

    /// Discard all parse state and start a new message. Subscribers are kept.
    pub fn reset(&mut self) {
        let stream_id = std::mem::take(&mut self.stream_id);
        let bus = std::mem::take(&mut self.bus);
        *self = Self::with_stream_id(stream_id, self.config);
        self.bus = bus;
    }

    fn step(&mut self, pos: usize, c: char) {
        match self.state {
            ParserState::Scanning => {
                if c == '<' {
                    self.span_start = pos;
                    self.pending.push(c);
                    self.transition(ParserState::TagMatching);
                } else {
                    self.prose.push(c);
                }
            }
            ParserState::TagMatching => self.step_tag_matching(pos, c),
            ParserState::AttrParsing => self.step_attr_parsing(pos, c),
            ParserState::Body => self.step_body(pos, c),
            ParserState::CdataGuard => {
                if self.cdata_close.advance(c) {
                    self.transition(ParserState::Body);
                }
            }
            ParserState::Complete | ParserState::Unterminated => {}
        }
    }

    fn step_tag_matching(&mut self, pos: usize, c: char) {
        let matched = self.pending.len();

        if matched < ARTIFACT_OPEN.len() {
            if ARTIFACT_OPEN[matched..].starts_with(c) {
                self.pending.push(c);
            } else {
                self.abort_candidate(pos, c);
            }
            return;
        }

        if c == '>' {
            self.transition(ParserState::AttrParsing);
            self.resolve_open_tag(pos);
        } else if c.is_whitespace() || c == '/' {
            self.pending.push(c);
            self.quote = None;
            self.transition(ParserState::AttrParsing);
        } else {
            self.abort_candidate(pos, c);
        }
    }

    fn step_attr_parsing(&mut self, pos: usize, c: char) {
        match self.quote {
            Some(q) => {
                if c == q {
                    self.quote = None;
                }
                self.pending.push(c);
            }
            None => match c {
                '"' | '\'' => {
                    self.quote = Some(c);
                    self.pending.push(c);
                }
                '>' => self.resolve_open_tag(pos),
                '<' => self.abort_candidate(pos, c),
                _ => self.pending.push(c),
            },
        }
    }

    /// The candidate was not an artifact tag: return its text to the prose and
    /// re-examine the contradicting character from SCANNING.
    fn abort_candidate(&mut self, pos: usize, c: char) {
        let pending = std::mem::take(&mut self.pending);
        self.prose.push_str(&pending);
        self.quote = None;
        self.transition(ParserState::Scanning);
        self.step(pos, c);
    }

    fn resolve_open_tag(&mut self, pos: usize) {
        let tag_inner = std::mem::take(&mut self.pending);
        let tag_inner = tag_inner[ARTIFACT_OPEN.len()..].trim_end();
        let self_closing = tag_inner.ends_with('/');
        let tag_text = tag_inner.trim_end_matches('/');

        self.spans_opened += 1;
        let mut header = ArtifactHeader::from_tag_text(tag_text, self.spans_opened);
        header.claim_unique_id(&mut self.ids, self.spans_opened);
        if let Some(original) = &header.duplicate_of {
            warn!(
                "Duplicate artifact identifier '{}' in stream {}; using '{}'",
                original, self.stream_id, header.id
            );
        }
        debug!(
            "Detected artifact '{}' ({}) in stream {}",
            header.id, header.content_type, self.stream_id
        );

        self.emit(StreamEvent::ArtifactDetected {
            stream_id: self.stream_id.clone(),
            id: header.id.clone(),
            content_type: header.content_type,
            title: header.title.clone(),
        });
        self.current = Some(header);

        if self_closing {
            self.complete_span(pos + 1);
            return;
        }

        self.depth = 1;
        self.open_matcher.reset();
        self.close_matcher.reset();
        self.cdata_open.reset();
        self.nested = NestedTag::None;
        self.transition(ParserState::Body);
    }

    fn step_body(&mut self, pos: usize, c: char) {
        if self.nested == NestedTag::Boundary {
            self.nested = if is_tag_boundary(c) {
                NestedTag::Open {
                    quote: None,
                    slash: false,
                }
            } else {
                NestedTag::None
            };
        }
        if let NestedTag::Open { .. } = self.nested {
            if self.step_nested_tag(c) {
                return;
            }
        }

        let cdata = self.cdata_open.advance(c);
        let close = self.close_matcher.advance(c);
        let open = self.open_matcher.advance(c);

        if cdata {
            self.open_matcher.reset();
            self.close_matcher.reset();
            self.cdata_close.reset();
            self.transition(ParserState::CdataGuard);
        } else if close {
            self.open_matcher.reset();
            self.cdata_open.reset();
            self.depth -= 1;
            if self.depth == 0 {
                self.complete_span(pos + c.len_utf8());
            }
        } else if open {
            self.nested = NestedTag::Boundary;
        }
    }

    /// Consume one character of a nested open tag. The depth is raised only
    /// once its `>` shows it is not self-closing. Returns false when an
    /// unquoted `<` shows it was not a tag, leaving `c` to the body matchers.
    fn step_nested_tag(&mut self, c: char) -> bool {
        let NestedTag::Open { quote, slash } = self.nested else {
            return false;
        };
        self.open_matcher.reset();
        self.close_matcher.reset();
        self.cdata_open.reset();

        self.nested = match (quote, c) {
            (Some(q), _) => NestedTag::Open {
                quote: (c != q).then_some(q),
                slash: false,
            },
            (None, '"' | '\'') => NestedTag::Open {
                quote: Some(c),
                slash: false,
            },
            (None, '>') => {
                if !slash {
                    self.depth += 1;
                    debug!("Nested artifact element, depth now {}", self.depth);
                }
                NestedTag::None
            }
            (None, '<') => {
                self.nested = NestedTag::None;
                return false;
            }
            (None, '/') => NestedTag::Open {
                quote: None,
                slash: true,
            },
            (None, c) if c.is_whitespace() => NestedTag::Open { quote: None, slash },
            (None, _) => NestedTag::Open {
                quote: None,
                slash: false,
            },
        };
        true
    }

    fn complete_span(&mut self, end: usize) {
        self.transition(ParserState::Complete);

        let ordinal = self.spans_opened;
        let header = self.current.clone();
        let parsed = parse_artifact_with(&self.buffer[self.span_start..end], |tag_text| {
            header.unwrap_or_else(|| ArtifactHeader::from_tag_text(tag_text, ordinal))
        });
        match parsed {
            Ok(block) => {
                self.completed += 1;
                info!(
                    "Completed artifact '{}' in stream {} ({} files, valid={})",
                    block.id,
                    self.stream_id,
                    block.files.len(),
                    block.valid
                );
                self.emit(StreamEvent::ArtifactCompleted {
                    stream_id: self.stream_id.clone(),
                    block: Arc::new(block),
                });
            }
            Err(mut failure) => {
                failure.offset += self.span_start;
                warn!("Artifact span in stream {} failed to parse: {}", self.stream_id, failure);
                self.reject(failure);
            }
        }

        self.current = None;
        self.depth = 0;
        self.transition(ParserState::Scanning);
    }

    fn reject(&mut self, failure: ParseFailure) {
        self.failures.push(failure.clone());
        self.emit(StreamEvent::ParseFailed {
            stream_id: self.stream_id.clone(),
            failure,
        });
    }

    fn transition(&mut self, to: ParserState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!("Stream {}: {} -> {}", self.stream_id, from, to);
        self.emit(StreamEvent::StateTransition {
            stream_id: self.stream_id.clone(),
            from,
            to,
        });
    }

    fn emit(&mut self, event: StreamEvent) {
        self.bus.publish(&event);
        self.outbox.push(event);
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StreamParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamParser")
            .field("stream_id", &self.stream_id)
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("depth", &self.depth)
            .field("completed", &self.completed)
            .finish()
    }
}
