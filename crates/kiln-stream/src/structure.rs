//! Structural parser and validator
//!
//! Turns one complete artifact span into an [`ArtifactBlock`]:
//!
//! ```xml
//! <artifact identifier="button" type="application/vnd.ant.react" title="Button">
//!   <description>A styled button</description>
//!   <dependencies>
//!     <dependency name="react" version="18.2.0" source="npm" />
//!   </dependencies>
//!   <files>
//!     <file path="Button.jsx"><![CDATA[export default function Button() {}]]></file>
//!   </files>
//! </artifact>
//! ```
//!
//! Schema problems become [`ValidationError`]s on a block that is still
//! returned. A structurally broken span (unterminated tag, unbalanced
//! open/close pairs) is a [`ParseFailure`] and yields no block.

use kiln_core::{
    ArtifactBlock, ArtifactFile, ContentType, Dependency, DependencySource, ParseFailure,
    ParseFailureKind, Provenance, ValidationError, ValidationErrorKind,
};

use std::collections::HashSet;

use crate::markup::{
    attribute, extract_payload, find_element, find_tag_end, is_tag_boundary, parse_attributes, ARTIFACT_CLOSE, ARTIFACT_OPEN, CDATA_CLOSE, CDATA_OPEN,
};

/// Identifier substituted when an artifact omits one
pub fn synthesize_id(ordinal: usize) -> String {
    format!("artifact-{}", ordinal)
}

/// Identity fields read from an artifact's open tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHeader {
    pub id: String,
    /// True when `id` was synthesized because the tag had none
    pub id_synthesized: bool,
    /// Explicit identifier that repeated an earlier one and was replaced
    pub duplicate_of: Option<String>,
    /// The raw `type` attribute, if present
    pub declared_type: Option<String>,
    pub content_type: ContentType,
    pub title: String,
}

impl ArtifactHeader {
    /// Resolve the header from open-tag text (everything after `<artifact`).
    ///
    /// `ordinal` is the 1-based position of the artifact in its message and
    /// seeds the synthesized identifier.
    pub fn from_tag_text(tag_text: &str, ordinal: usize) -> Self {
        let attrs = parse_attributes(tag_text);

        let explicit_id = attribute(&attrs, "identifier")
            .or_else(|| attribute(&attrs, "id"))
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let (id, id_synthesized) = match explicit_id {
            Some(id) => (id.to_string(), false),
            None => (synthesize_id(ordinal), true),
        };

        let declared_type = attribute(&attrs, "type").map(|t| t.to_string());
        let content_type = declared_type
            .as_deref()
            .map(ContentType::parse)
            .unwrap_or(ContentType::Unknown);

        let title = attribute(&attrs, "title")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .unwrap_or_else(|| id.clone());

        Self {
            id,
            id_synthesized,
            duplicate_of: None,
            declared_type,
            content_type,
            title,
        }
    }

    /// Replace an identifier already in `taken` with the first free
    /// `artifact-{n}`, counting up from `ordinal`, and claim the result.
    pub fn claim_unique_id(&mut self, taken: &mut HashSet<String>, ordinal: usize) {
        if taken.contains(&self.id) {
            let mut n = ordinal;
            while taken.contains(&synthesize_id(n)) {
                n += 1;
            }
            let replaced = std::mem::replace(&mut self.id, synthesize_id(n));
            if !self.id_synthesized {
                self.duplicate_of = Some(replaced);
            }
        }
        taken.insert(self.id.clone());
    }
}

/// Parse one complete artifact span.
///
/// The span must start with `<artifact` (leading whitespace allowed) and end
/// with the depth-zero `</artifact>` (trailing whitespace allowed). Failure
/// offsets are relative to the span.
pub fn parse_artifact(span: &str, ordinal: usize) -> Result<ArtifactBlock, ParseFailure> {
    parse_artifact_with(span, |tag_text| {
        ArtifactHeader::from_tag_text(tag_text, ordinal)
    })
}

/// Parse a span whose header may already be known, e.g. resolved when its
/// open tag streamed past. `header` receives the open-tag text.
pub(crate) fn parse_artifact_with(
    span: &str,
    header: impl FnOnce(&str) -> ArtifactHeader,
) -> Result<ArtifactBlock, ParseFailure> {
    let start = span.len() - span.trim_start().len();
    let name_end = start + ARTIFACT_OPEN.len();

    let opens_artifact = span[start..].starts_with(ARTIFACT_OPEN)
        && span[name_end..].chars().next().is_some_and(is_tag_boundary);
    if !opens_artifact {
        return Err(ParseFailure::new(
            ParseFailureKind::NotAnArtifact,
            "span does not begin with an <artifact> element",
            start,
        ));
    }

    let tag_end = find_tag_end(span, name_end).ok_or_else(|| {
        ParseFailure::new(
            ParseFailureKind::UnterminatedTag,
            "artifact open tag is never closed with '>'",
            start,
        )
    })?;

    let tag_inner = &span[name_end..tag_end - 1];
    let self_closing = tag_inner.trim_end().ends_with('/');
    let tag_text = tag_inner.trim_end().trim_end_matches('/');
    let header = header(tag_text);

    let body = if self_closing {
        if !span[tag_end..].trim().is_empty() {
            return Err(ParseFailure::new(
                ParseFailureKind::UnbalancedDepth,
                "content follows a self-closing artifact element",
                tag_end,
            )
            .with_artifact_id(&header.id));
        }
        ""
    } else {
        let close_start = matching_close(span, tag_end).map_err(|message| {
            ParseFailure::new(ParseFailureKind::UnbalancedDepth, message, start)
                .with_artifact_id(&header.id)
        })?;
        let close_end = close_start + ARTIFACT_CLOSE.len();
        if !span[close_end..].trim().is_empty() {
            return Err(ParseFailure::new(
                ParseFailureKind::UnbalancedDepth,
                "content follows the depth-zero closing delimiter",
                close_end,
            )
            .with_artifact_id(&header.id));
        }
        &span[tag_end..close_start]
    };

    Ok(build_block(span, body, header))
}

/// Locate the depth-zero `</artifact>` for an element whose open tag ends at
/// `from`. Nested open tags raise the depth unless self-closing; raw payloads
/// are opaque.
fn matching_close(span: &str, from: usize) -> Result<usize, &'static str> {
    let mut depth = 1usize;
    let mut pos = from;

    while let Some(offset) = span[pos..].find('<') {
        pos += offset;
        let rest = &span[pos..];

        if let Some(payload) = rest.strip_prefix(CDATA_OPEN) {
            let close = payload
                .find(CDATA_CLOSE)
                .ok_or("raw payload section is never closed")?;
            pos += CDATA_OPEN.len() + close + CDATA_CLOSE.len();
        } else if rest.starts_with(ARTIFACT_CLOSE) {
            depth -= 1;
            if depth == 0 {
                return Ok(pos);
            }
            pos += ARTIFACT_CLOSE.len();
        } else if rest.starts_with(ARTIFACT_OPEN)
            && rest[ARTIFACT_OPEN.len()..]
                .chars()
                .next()
                .is_some_and(is_tag_boundary)
        {
            let name_end = pos + ARTIFACT_OPEN.len();
            match find_tag_end(span, name_end) {
                Some(tag_end) => {
                    // Self-closing nested elements open and close in place
                    if !span[name_end..tag_end - 1].trim_end().ends_with('/') {
                        depth += 1;
                    }
                    pos = tag_end;
                }
                None => pos = name_end,
            }
        } else {
            pos += 1;
        }
    }

    Err("artifact element has no matching closing delimiter at depth zero")
}

fn build_block(span: &str, body: &str, header: ArtifactHeader) -> ArtifactBlock {
    let mut errors = Vec::new();

    if header.id_synthesized {
        errors.push(
            ValidationError::new(
                ValidationErrorKind::SchemaInvalid,
                format!("missing identifier; substituted '{}'", header.id),
            )
            .at("artifact@identifier"),
        );
    }

    if let Some(original) = &header.duplicate_of {
        errors.push(
            ValidationError::new(
                ValidationErrorKind::SchemaInvalid,
                format!(
                    "duplicate identifier '{}'; substituted '{}'",
                    original, header.id
                ),
            )
            .at("artifact@identifier"),
        );
    }

    match &header.declared_type {
        None => errors.push(
            ValidationError::new(ValidationErrorKind::UnknownType, "missing type attribute")
                .at("artifact@type"),
        ),
        Some(declared) if header.content_type == ContentType::Unknown => errors.push(
            ValidationError::new(
                ValidationErrorKind::UnknownType,
                format!("unsupported artifact type '{}'", declared),
            )
            .at("artifact@type"),
        ),
        Some(_) => {}
    }

    let description = find_element(body, "description", 0).and_then(|el| {
        let (text, _) = extract_payload(el.inner);
        let text = text.trim().to_string();
        (!text.is_empty()).then_some(text)
    });

    let dependencies = parse_dependencies(body, &mut errors);
    let files = parse_files(body, header.content_type, &mut errors);
    errors.extend(check_syntax(header.content_type, &files));

    ArtifactBlock {
        id: header.id,
        content_type: header.content_type,
        title: header.title,
        description,
        dependencies,
        files,
        valid: errors.is_empty(),
        errors,
        raw: span.to_string(),
        provenance: Provenance::Element,
        confidence: 1.0,
    }
}

fn parse_dependencies(body: &str, errors: &mut Vec<ValidationError>) -> Vec<Dependency> {
    let Some(section) = find_element(body, "dependencies", 0) else {
        return Vec::new();
    };

    let mut dependencies = Vec::new();
    let mut pos = 0;
    let mut index = 0;

    while let Some(el) = find_element(section.inner, "dependency", pos) {
        pos = el.end;
        index += 1;
        let location = format!("dependencies/dependency[{}]", index);
        let attrs = parse_attributes(el.attrs_text);

        let name = attribute(&attrs, "name").map(str::trim).filter(|n| !n.is_empty());
        let version = attribute(&attrs, "version")
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let source = match attribute(&attrs, "source") {
            None => Some(DependencySource::Registry),
            Some(raw) => DependencySource::parse(raw),
        };

        match (name, version, source) {
            (Some(name), Some(version), Some(source)) => dependencies.push(Dependency {
                name: name.to_string(),
                version: version.to_string(),
                source,
            }),
            (name, version, source) => {
                let mut problems = Vec::new();
                if name.is_none() {
                    problems.push("missing name".to_string());
                }
                if version.is_none() {
                    problems.push("missing version".to_string());
                }
                if source.is_none() {
                    problems.push(format!(
                        "unrecognised source '{}'",
                        attribute(&attrs, "source").unwrap_or_default()
                    ));
                }
                errors.push(
                    ValidationError::new(
                        ValidationErrorKind::InvalidDependencies,
                        problems.join(", "),
                    )
                    .at(location),
                );
            }
        }
    }

    dependencies
}

fn parse_files(
    body: &str,
    content_type: ContentType,
    errors: &mut Vec<ValidationError>,
) -> Vec<ArtifactFile> {
    let region = find_element(body, "files", 0)
        .map(|section| section.inner)
        .unwrap_or(body);

    let mut files = Vec::new();
    let mut pos = 0;

    while let Some(el) = find_element(region, "file", pos) {
        pos = el.end;
        let attrs = parse_attributes(el.attrs_text);

        let path = match attribute(&attrs, "path")
            .or_else(|| attribute(&attrs, "name"))
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            Some(path) => path.to_string(),
            None => {
                let path = if files.is_empty() {
                    content_type.default_file_name().to_string()
                } else {
                    format!("file-{}.txt", files.len() + 1)
                };
                errors.push(
                    ValidationError::new(
                        ValidationErrorKind::SchemaInvalid,
                        format!("file entry has no path; using '{}'", path),
                    )
                    .at(format!("files/file[{}]", files.len() + 1)),
                );
                path
            }
        };

        let (content, wrapped) = extract_payload(el.inner);
        if !wrapped {
            if content.is_empty() {
                errors.push(
                    ValidationError::new(ValidationErrorKind::SchemaInvalid, "file has no content")
                        .at(format!("files/{}", path)),
                );
            } else {
                errors.push(
                    ValidationError::new(
                        ValidationErrorKind::MissingCdata,
                        "file content is not wrapped in a raw-payload section",
                    )
                    .at(format!("files/{}", path)),
                );
            }
        }

        files.push(ArtifactFile { path, content });
    }

    if files.is_empty() {
        errors.push(
            ValidationError::new(ValidationErrorKind::SchemaInvalid, "artifact declares no files")
                .at("files"),
        );
    }

    files
}

/// Content checks that do not need a sandbox
pub(crate) fn check_syntax(content_type: ContentType, files: &[ArtifactFile]) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for file in files {
        if file.path.to_ascii_lowercase().ends_with(".json") {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&file.content) {
                errors.push(
                    ValidationError::new(
                        ValidationErrorKind::SyntaxError,
                        format!("invalid JSON: {}", e),
                    )
                    .at(format!("files/{}", file.path)),
                );
            }
        }
    }

    if content_type == ContentType::Svg {
        if let Some(primary) = files.first() {
            if !primary.content.contains("<svg") {
                errors.push(
                    ValidationError::new(
                        ValidationErrorKind::SyntaxError,
                        "SVG artifact has no <svg> root element",
                    )
                    .at(format!("files/{}", primary.path)),
                );
            }
        }
    }

    errors
}
