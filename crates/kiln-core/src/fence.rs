//! Fenced code block scanning
//!
//! Finds ```` ``` ```` / `~~~` fenced blocks in message text together with
//! their declared language and, where one is given, a file name. File names
//! come from the info string (`css Button.module.css`, `json:config.json`,
//! `jsx title="App.jsx"`) or from a path comment on the first content line.
//!
//! Block structure comes from pulldown-cmark, so fences nested in block
//! quotes and list items are found too. Unterminated fences are ignored.

use pulldown_cmark::{CodeBlockKind, Event, Parser as MdParser, Tag, TagEnd};
use regex::Regex;
use std::sync::OnceLock;

/// A fenced code block found in text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// Declared language, lowercased (empty when none was given)
    pub language: String,
    /// File name from the info string or a first-line path comment
    pub filename: Option<String>,
    /// Text between the fences
    pub content: String,
    /// Byte offset of the opening fence
    pub start: usize,
    /// Byte offset just past the closing fence line
    pub end: usize,
}

struct OpenFence {
    info: String,
    start: usize,
    content: String,
}

fn info_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:title|filename|file|name)\s*=\s*(?:"([^"]*)"|'([^']*)'|(\S+))"#)
            .expect("valid info attribute regex")
    })
}

/// Scan text for every terminated fenced code block, in document order
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenFence> = None;

    for (event, range) in MdParser::new(text).into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                open = Some(OpenFence {
                    info: info.to_string(),
                    start: range.start,
                    content: String::new(),
                });
            }
            Event::Text(chunk) => {
                if let Some(fence) = open.as_mut() {
                    fence.content.push_str(&chunk);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                let Some(fence) = open.take() else {
                    continue;
                };
                let source = text[fence.start..range.end].trim_end();
                if !has_closing_fence(source) {
                    continue;
                }

                let content = fence
                    .content
                    .strip_suffix("\r\n")
                    .or_else(|| fence.content.strip_suffix('\n'))
                    .unwrap_or(&fence.content)
                    .to_string();

                let (language, info_filename) = parse_info(&fence.info);
                let filename = info_filename.or_else(|| first_line_filename(&content));

                blocks.push(FencedBlock {
                    language,
                    filename,
                    content,
                    start: fence.start,
                    end: line_end(text, fence.start + source.len()),
                });
            }
            _ => {}
        }
    }

    blocks
}

/// Whether the block source ends with a closing fence line.
/// CommonMark runs an unclosed fence to the end of its container.
fn has_closing_fence(source: &str) -> bool {
    let opening = source.trim_start();
    let Some(marker) = opening.chars().next() else {
        return false;
    };
    let open_len = opening.chars().take_while(|c| *c == marker).count();

    let mut lines = source.lines();
    lines.next();
    let Some(last) = lines.last() else {
        return false;
    };
    let last = last.trim_start_matches(|c: char| c == '>' || c.is_whitespace()).trim_end();
    last.chars().count() >= open_len && last.chars().all(|c| c == marker)
}

/// Offset just past the line break that follows `pos`, if any
fn line_end(text: &str, pos: usize) -> usize {
    let rest = &text[pos..];
    if rest.starts_with("\r\n") {
        pos + 2
    } else if rest.starts_with('\n') {
        pos + 1
    } else {
        pos
    }
}

/// Split an info string into language and optional file name
fn parse_info(info: &str) -> (String, Option<String>) {
    let mut tokens = info.split_whitespace();
    let Some(first) = tokens.next() else {
        return (String::new(), None);
    };

    if let Some((language, filename)) = first.split_once(':') {
        let filename = (!filename.is_empty()).then(|| filename.to_string());
        return (language.to_ascii_lowercase(), filename);
    }

    let language = first.to_ascii_lowercase();

    if let Some(caps) = info_attr_regex().captures(info) {
        let value = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string());
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            return (language, Some(value));
        }
    }

    let filename = tokens
        .find(|t| looks_like_filename(t))
        .map(|t| t.to_string());
    (language, filename)
}

/// Path comment on the first content line, e.g. `/* Button.module.css */`
fn first_line_filename(content: &str) -> Option<String> {
    let line = content.lines().next()?.trim();

    let inner = if let Some(rest) = line.strip_prefix("/*") {
        rest.strip_suffix("*/")?
    } else if let Some(rest) = line.strip_prefix("<!--") {
        rest.strip_suffix("-->")?
    } else if let Some(rest) = line.strip_prefix("//") {
        rest
    } else if let Some(rest) = line.strip_prefix('#') {
        rest
    } else {
        return None;
    };

    let inner = inner.trim();
    let inner = inner
        .strip_prefix("filename:")
        .or_else(|| inner.strip_prefix("file:"))
        .map(str::trim)
        .unwrap_or(inner);

    looks_like_filename(inner).then(|| inner.to_string())
}

fn looks_like_filename(candidate: &str) -> bool {
    if candidate.is_empty() || candidate.contains(char::is_whitespace) || candidate.contains('=') {
        return false;
    }
    match candidate.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && !ext.is_empty()
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}
