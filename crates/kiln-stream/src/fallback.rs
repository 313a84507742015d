//! Fenced-code fallback
//!
//! Messages that carry no artifact element may still hold renderable code in
//! fenced blocks. Blocks whose language maps to a content type are promoted to
//! artifacts with reduced confidence.

use kiln_core::{fenced_blocks, ArtifactBlock, ArtifactFile, ContentType, Provenance};

use crate::structure::check_syntax;

/// Promote renderable fenced blocks in `text` to artifacts
pub fn fallback_blocks(text: &str, confidence: f32) -> Vec<ArtifactBlock> {
    fenced_blocks(text)
        .into_iter()
        .filter_map(|fence| {
            let content_type = ContentType::from_fence_language(&fence.language)?;
            Some((fence, content_type))
        })
        .enumerate()
        .map(|(i, (fence, content_type))| {
            let ordinal = i + 1;
            let title = fence
                .filename
                .clone()
                .unwrap_or_else(|| format!("{} block {}", fence.language, ordinal));
            let path = fence
                .filename
                .clone()
                .unwrap_or_else(|| content_type.default_file_name().to_string());

            let files = vec![ArtifactFile {
                path,
                content: fence.content,
            }];
            let errors = check_syntax(content_type, &files);

            ArtifactBlock {
                id: format!("fallback-{}", ordinal),
                content_type,
                title,
                description: None,
                dependencies: Vec::new(),
                files,
                valid: errors.is_empty(),
                errors,
                raw: text[fence.start..fence.end].to_string(),
                provenance: Provenance::FencedBlock,
                confidence,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_renderable_languages_promoted() {
        let text = "```python\nprint(1)\n```\n```svg\n<svg></svg>\n```\n```tsx Card.tsx\nexport default () => null;\n```\n";
        let blocks = fallback_blocks(text, 0.5);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].id, "fallback-1");
        assert_eq!(blocks[0].content_type, ContentType::Svg);
        assert_eq!(blocks[0].title, "svg block 1");
        assert_eq!(blocks[0].files[0].path, "image.svg");
        assert!(blocks[0].valid);

        assert_eq!(blocks[1].content_type, ContentType::React);
        assert_eq!(blocks[1].title, "Card.tsx");
        assert_eq!(blocks[1].files[0].path, "Card.tsx");
        assert_eq!(blocks[1].provenance, Provenance::FencedBlock);
        assert_eq!(blocks[1].confidence, 0.5);
        assert!(blocks[1].raw.starts_with("```tsx"));
    }

    #[test]
    fn test_broken_svg_flagged() {
        let blocks = fallback_blocks("```svg\n<rect/>\n```", 0.5);
        assert_eq!(blocks.len(), 1);
        assert!(!blocks[0].valid);
        assert!(blocks[0].has_error(kiln_core::ValidationErrorKind::SyntaxError));
    }
}
