//! Sibling block lookup
//!
//! Collects every code block in a message that could stand in for an
//! unresolved import: fenced code blocks and the files of artifact elements.
//! Blocks are keyed by normalised base file name.

use kiln_core::{fenced_blocks, Provenance};
use kiln_stream::parse_document;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Broad kind of a sibling block, from its file extension or fence language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiblingKind {
    Style,
    Json,
    Script,
    Markup,
    Other,
}

impl SiblingKind {
    pub fn from_language(language: &str) -> Self {
        match language.to_ascii_lowercase().as_str() {
            "css" | "scss" | "sass" | "less" => SiblingKind::Style,
            "json" | "jsonc" => SiblingKind::Json,
            "js" | "jsx" | "ts" | "tsx" | "javascript" | "typescript" | "mjs" | "cjs" => {
                SiblingKind::Script
            }
            "html" | "htm" | "svg" | "xml" => SiblingKind::Markup,
            _ => SiblingKind::Other,
        }
    }

    pub fn from_path(path: &str) -> Self {
        match base_name(path).rsplit_once('.') {
            Some((_, ext)) => Self::from_language(ext),
            None => SiblingKind::Other,
        }
    }
}

/// How a reference was matched to a sibling block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchQuality {
    /// Same base file name
    Exact,
    /// Same stem (`Button.module.css` ~ `Button.css`)
    Stem,
    /// The only unnamed block of the right kind
    LoneUnnamed,
}

/// A code block found elsewhere in the message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiblingBlock {
    pub filename: Option<String>,
    pub kind: SiblingKind,
    pub content: String,
}

/// Filename-keyed index of sibling blocks
#[derive(Debug, Clone, Default)]
pub struct DependencyLookup {
    blocks: Vec<SiblingBlock>,
    by_name: HashMap<String, usize>,
    by_stem: HashMap<(String, SiblingKind), usize>,
}

impl DependencyLookup {
    /// Build the lookup from a complete message
    pub fn from_message(text: &str) -> Self {
        let mut lookup = Self::default();

        for fence in fenced_blocks(text) {
            let kind = match &fence.filename {
                Some(name) if SiblingKind::from_path(name) != SiblingKind::Other => {
                    SiblingKind::from_path(name)
                }
                _ => SiblingKind::from_language(&fence.language),
            };
            lookup.insert(SiblingBlock {
                filename: fence.filename,
                kind,
                content: fence.content,
            });
        }

        // Fallback blocks are the fences already indexed above
        let elements = parse_document(text)
            .blocks
            .into_iter()
            .filter(|b| b.provenance == Provenance::Element);
        for block in elements {
            for file in block.files {
                lookup.insert(SiblingBlock {
                    kind: SiblingKind::from_path(&file.path),
                    filename: Some(file.path),
                    content: file.content,
                });
            }
        }

        debug!(
            "Built dependency lookup: {} blocks, {} named",
            lookup.blocks.len(),
            lookup.by_name.len()
        );
        lookup
    }

    /// Add a block. The first block registered under a name wins.
    pub fn insert(&mut self, block: SiblingBlock) {
        let index = self.blocks.len();
        if let Some(name) = &block.filename {
            let name = normalize(name);
            self.by_stem
                .entry((stem(&name).to_string(), block.kind))
                .or_insert(index);
            self.by_name.entry(name).or_insert(index);
        }
        self.blocks.push(block);
    }

    /// Find the sibling for an import specifier such as `./styles/Button.module.css`
    pub fn find(&self, specifier: &str, kind: SiblingKind) -> Option<(&SiblingBlock, MatchQuality)> {
        let name = normalize(specifier);

        if let Some(&i) = self.by_name.get(&name) {
            if self.blocks[i].kind == kind {
                return Some((&self.blocks[i], MatchQuality::Exact));
            }
        }

        if let Some(&i) = self.by_stem.get(&(stem(&name).to_string(), kind)) {
            return Some((&self.blocks[i], MatchQuality::Stem));
        }

        let mut unnamed = self
            .blocks
            .iter()
            .filter(|b| b.filename.is_none() && b.kind == kind);
        match (unnamed.next(), unnamed.next()) {
            (Some(block), None) => Some((block, MatchQuality::LoneUnnamed)),
            _ => None,
        }
    }

    pub fn blocks(&self) -> &[SiblingBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn base_name(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Lowercased base file name
pub(crate) fn normalize(path: &str) -> String {
    base_name(path.trim()).to_ascii_lowercase()
}

/// File name up to its first dot
fn stem(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("./styles/Button.module.css"), "button.module.css");
        assert_eq!(normalize("../data/config.json?raw"), "config.json");
        assert_eq!(normalize("@/App.tsx"), "app.tsx");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(SiblingKind::from_path("a/b.module.scss"), SiblingKind::Style);
        assert_eq!(SiblingKind::from_path("config.json"), SiblingKind::Json);
        assert_eq!(SiblingKind::from_language("TSX"), SiblingKind::Script);
        assert_eq!(SiblingKind::from_path("Makefile"), SiblingKind::Other);
    }

    #[test]
    fn test_exact_match_from_fence_info() {
        let text = "```css Button.module.css\n.primary { color: red; }\n```\n";
        let lookup = DependencyLookup::from_message(text);
        let (block, quality) = lookup
            .find("./Button.module.css", SiblingKind::Style)
            .unwrap();
        assert_eq!(quality, MatchQuality::Exact);
        assert!(block.content.contains(".primary"));
    }

    #[test]
    fn test_stem_match() {
        let text = "```css\n/* Card.css */\n.card {}\n```\n";
        let lookup = DependencyLookup::from_message(text);
        let (_, quality) = lookup.find("./Card.module.css", SiblingKind::Style).unwrap();
        assert_eq!(quality, MatchQuality::Stem);
    }

    #[test]
    fn test_lone_unnamed_match_requires_single_candidate() {
        let one = DependencyLookup::from_message("```css\n.a {}\n```\n");
        let (_, quality) = one.find("./Anything.module.css", SiblingKind::Style).unwrap();
        assert_eq!(quality, MatchQuality::LoneUnnamed);

        let two = DependencyLookup::from_message("```css\n.a {}\n```\n```css\n.b {}\n```\n");
        assert!(two.find("./Anything.module.css", SiblingKind::Style).is_none());
    }

    #[test]
    fn test_kind_must_agree() {
        let lookup = DependencyLookup::from_message("```json config.json\n{}\n```\n");
        assert!(lookup.find("./config.css", SiblingKind::Style).is_none());
        assert!(lookup.find("./config.json", SiblingKind::Json).is_some());
    }

    #[test]
    fn test_artifact_files_are_siblings() {
        let text = concat!(
            r#"<artifact identifier="a" type="application/vnd.ant.react" title="A"><files>"#,
            r#"<file path="App.jsx"><![CDATA[import data from "./data.json";]]></file>"#,
            r#"<file path="data.json"><![CDATA[{"n": 1}]]></file>"#,
            "</files></artifact>"
        );
        let lookup = DependencyLookup::from_message(text);
        assert_eq!(lookup.len(), 2);
        let (block, quality) = lookup.find("./data.json", SiblingKind::Json).unwrap();
        assert_eq!(quality, MatchQuality::Exact);
        assert_eq!(block.content, r#"{"n": 1}"#);
    }
}
