//! Core type definitions for kiln
//!
//! An [`ArtifactBlock`] is created only by the structural parser from a
//! complete span. Consumers receive it behind an `Arc` in stream events, so a
//! later repair produces a new code string instead of mutating the block.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared content type of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Source code displayed as text
    Code,
    /// A complete HTML document
    Html,
    /// Inline SVG graphic
    Svg,
    /// Mermaid diagram markup
    Mermaid,
    /// React component markup
    React,
    /// Declared type outside the known vocabulary
    Unknown,
}

impl ContentType {
    /// Parse a declared `type` attribute.
    ///
    /// Accepts MIME-style names and short aliases. Anything else is `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "application/vnd.ant.code" | "code" => ContentType::Code,
            "text/html" | "html" => ContentType::Html,
            "image/svg+xml" | "svg" => ContentType::Svg,
            "application/vnd.ant.mermaid" | "mermaid" => ContentType::Mermaid,
            "application/vnd.ant.react" | "react" => ContentType::React,
            _ => ContentType::Unknown,
        }
    }

    /// Content type for a fenced code block language, if it is one the
    /// fallback parser promotes to an artifact
    pub fn from_fence_language(language: &str) -> Option<Self> {
        match language.trim().to_ascii_lowercase().as_str() {
            "html" | "htm" => Some(ContentType::Html),
            "svg" => Some(ContentType::Svg),
            "mermaid" => Some(ContentType::Mermaid),
            "jsx" | "tsx" | "react" => Some(ContentType::React),
            _ => None,
        }
    }

    /// Canonical MIME-style name
    pub fn mime(&self) -> &'static str {
        match self {
            ContentType::Code => "application/vnd.ant.code",
            ContentType::Html => "text/html",
            ContentType::Svg => "image/svg+xml",
            ContentType::Mermaid => "application/vnd.ant.mermaid",
            ContentType::React => "application/vnd.ant.react",
            ContentType::Unknown => "application/octet-stream",
        }
    }

    /// File name used when a file entry omits its path
    pub fn default_file_name(&self) -> &'static str {
        match self {
            ContentType::Code => "snippet.txt",
            ContentType::Html => "index.html",
            ContentType::Svg => "image.svg",
            ContentType::Mermaid => "diagram.mmd",
            ContentType::React => "App.jsx",
            ContentType::Unknown => "artifact.txt",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime())
    }
}

/// Where a dependency is fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencySource {
    /// Package registry (npm)
    Registry,
    /// Content delivery network
    Cdn,
    /// Provided by another file in the same artifact
    Local,
}

impl DependencySource {
    /// Parse a `source` attribute; `None` for unrecognised values
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "npm" | "registry" => Some(DependencySource::Registry),
            "cdn" => Some(DependencySource::Cdn),
            "local" => Some(DependencySource::Local),
            _ => None,
        }
    }
}

/// A declared artifact dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    pub source: DependencySource,
}

/// One file of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub path: String,
    /// Verbatim payload, never re-escaped
    pub content: String,
}

/// Kinds of schema problems reported by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    SchemaInvalid,
    MissingCdata,
    InvalidDependencies,
    SyntaxError,
    UnknownType,
}

impl ValidationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorKind::SchemaInvalid => "schema_invalid",
            ValidationErrorKind::MissingCdata => "missing_cdata",
            ValidationErrorKind::InvalidDependencies => "invalid_dependencies",
            ValidationErrorKind::SyntaxError => "syntax_error",
            ValidationErrorKind::UnknownType => "unknown_type",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A schema problem found in an otherwise parseable artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
    /// Element or file the problem was found in
    pub location: Option<String>,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "[{}] {} ({})", self.kind, self.message, location),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// How an artifact was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// A well-formed `<artifact>` element
    Element,
    /// Fenced code block heuristic, used only when no element exists
    FencedBlock,
}

/// A structured artifact extracted from message text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactBlock {
    /// Identifier, unique within a message
    pub id: String,
    pub content_type: ContentType,
    pub title: String,
    pub description: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub files: Vec<ArtifactFile>,
    /// False when any validation error was recorded
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    /// The raw source span this block was built from
    pub raw: String,
    pub provenance: Provenance,
    /// 1.0 for elements, lower for fallback blocks
    pub confidence: f32,
}

impl ArtifactBlock {
    /// The first file, which holds the artifact's main code
    pub fn primary_file(&self) -> Option<&ArtifactFile> {
        self.files.first()
    }

    /// Code of the primary file
    pub fn code(&self) -> Option<&str> {
        self.primary_file().map(|f| f.content.as_str())
    }

    /// Check whether a validation error of the given kind was recorded
    pub fn has_error(&self, kind: ValidationErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }
}

/// Kinds of structural breakage that prevent a block from being produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailureKind {
    /// The opening tag never reached its `>`
    UnterminatedTag,
    /// Open and close delimiters do not pair up at depth zero
    UnbalancedDepth,
    /// The stream ended inside an artifact
    UnterminatedStream,
    /// The span does not start with an artifact element
    NotAnArtifact,
}

impl ParseFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseFailureKind::UnterminatedTag => "unterminated_tag",
            ParseFailureKind::UnbalancedDepth => "unbalanced_depth",
            ParseFailureKind::UnterminatedStream => "unterminated_stream",
            ParseFailureKind::NotAnArtifact => "not_an_artifact",
        }
    }
}

/// A span that could not become an [`ArtifactBlock`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub kind: ParseFailureKind,
    pub message: String,
    /// Byte offset of the span start within the message
    pub offset: usize,
    /// Identifier, when the open tag was read far enough to know it
    pub artifact_id: Option<String>,
}

impl ParseFailure {
    pub fn new(kind: ParseFailureKind, message: impl Into<String>, offset: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            offset,
            artifact_id: None,
        }
    }

    pub fn with_artifact_id(mut self, id: impl Into<String>) -> Self {
        self.artifact_id = Some(id.into());
        self
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at byte {}: {}",
            self.kind.as_str(),
            self.offset,
            self.message
        )
    }
}
