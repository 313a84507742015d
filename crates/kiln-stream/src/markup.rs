//! Low-level markup scanning for the artifact element vocabulary
//!
//! Only what the artifact/description/dependencies/files vocabulary needs:
//! tag boundaries, quoted attributes, raw-payload (CDATA) sections and a
//! handful of entities in attribute values. Raw-payload sections are opaque
//! to every search here.

use regex::Regex;
use std::sync::OnceLock;

pub(crate) const ARTIFACT_OPEN: &str = "<artifact";
pub(crate) const ARTIFACT_CLOSE: &str = "</artifact>";
pub(crate) const CDATA_OPEN: &str = "<![CDATA[";
pub(crate) const CDATA_CLOSE: &str = "]]>";

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("valid attribute regex")
    })
}

/// Parse `name="value"` pairs from the inside of an open tag
pub(crate) fn parse_attributes(tag_text: &str) -> Vec<(String, String)> {
    attribute_regex()
        .captures_iter(tag_text)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_string();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str();
            Some((name, unescape_entities(value)))
        })
        .collect()
}

/// Look up an attribute by name
pub(crate) fn attribute<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

/// Decode the predefined XML entities
pub(crate) fn unescape_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Whether `c` may follow an element name in an open tag
pub(crate) fn is_tag_boundary(c: char) -> bool {
    c.is_whitespace() || c == '>' || c == '/'
}

/// Find `needle` at or after `from`, skipping raw-payload sections
pub(crate) fn find_outside_cdata(hay: &str, needle: &str, from: usize) -> Option<usize> {
    let mut pos = from;
    loop {
        let rest = hay.get(pos..)?;
        let found = rest.find(needle)?;
        match rest.find(CDATA_OPEN) {
            Some(cdata) if cdata < found => {
                let payload = pos + cdata + CDATA_OPEN.len();
                let close = hay[payload..].find(CDATA_CLOSE)?;
                pos = payload + close + CDATA_CLOSE.len();
            }
            _ => return Some(pos + found),
        }
    }
}

/// Find the `>` closing an open tag, honouring quoted attribute values.
///
/// Returns the offset just past `>`, or `None` when the tag never closes or
/// an unquoted `<` shows it was not a tag.
pub(crate) fn find_tag_end(hay: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in hay.get(from..)?.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '>' => return Some(from + i + 1),
                '<' => return None,
                _ => {}
            },
        }
    }
    None
}

/// A located element
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Element<'a> {
    /// Text between the element name and `>` (minus a self-closing `/`)
    pub attrs_text: &'a str,
    /// Text between the open and close tags
    pub inner: &'a str,
    /// Offset just past the element
    pub end: usize,
}

/// Find the next `<name ...>...</name>` (or `<name .../>`) at or after `from`
pub(crate) fn find_element<'a>(hay: &'a str, name: &str, from: usize) -> Option<Element<'a>> {
    let open = format!("<{}", name);
    let close = format!("</{}>", name);

    let mut pos = from;
    let start = loop {
        let candidate = find_outside_cdata(hay, &open, pos)?;
        let after = candidate + open.len();
        match hay[after..].chars().next() {
            Some(c) if is_tag_boundary(c) => break candidate,
            _ => pos = after,
        }
    };

    let name_end = start + open.len();
    let tag_end = find_tag_end(hay, name_end)?;
    let tag_inner = &hay[name_end..tag_end - 1];

    if tag_inner.trim_end().ends_with('/') {
        return Some(Element {
            attrs_text: tag_inner.trim_end().trim_end_matches('/'),
            inner: "",
            end: tag_end,
        });
    }

    let close_start = find_outside_cdata(hay, &close, tag_end)?;
    Some(Element {
        attrs_text: tag_inner,
        inner: &hay[tag_end..close_start],
        end: close_start + close.len(),
    })
}

/// Extract a raw payload.
///
/// Returns the concatenated contents of leading, directly adjacent CDATA
/// sections and `true`, or the trimmed text and `false` when the payload is
/// not wrapped.
pub(crate) fn extract_payload(inner: &str) -> (String, bool) {
    let trimmed = inner.trim_start();
    if !trimmed.starts_with(CDATA_OPEN) {
        return (inner.trim().to_string(), false);
    }

    let mut payload = String::new();
    let mut rest = trimmed;
    while let Some(section) = rest.strip_prefix(CDATA_OPEN) {
        match section.find(CDATA_CLOSE) {
            Some(close) => {
                payload.push_str(&section[..close]);
                rest = &section[close + CDATA_CLOSE.len()..];
            }
            None => {
                payload.push_str(section);
                break;
            }
        }
    }
    (payload, true)
}
