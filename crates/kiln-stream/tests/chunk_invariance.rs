//! Fragmentation must never change what the parser produces

use kiln_core::{ParseFailureKind, Provenance, ValidationErrorKind};
use kiln_stream::{parse_document, StreamEvent, StreamParser};

const MESSAGE: &str = r#"Sure! Here is the component and its styles.

<artifact identifier="fancy-button" type="application/vnd.ant.react" title="Fancy Button">
  <description>Button with a module stylesheet</description>
  <dependencies>
    <dependency name="react" version="18.2.0" source="npm" />
  </dependencies>
  <files>
    <file path="Button.jsx"><![CDATA[import styles from "./Button.module.css";
export default function Button() {
  return <button className={styles.primary}>{"</artifact> <artifact >"}</button>;
}]]></file>
  </files>
</artifact>

And a diagram:
<artifact identifier="flow" type="application/vnd.ant.mermaid" title="Flow"><files><file path="flow.mmd"><![CDATA[graph TD; A-->B]]></file></files></artifact>
<artifact type="text/html"><files><file path="index.html">no cdata here</file></files></artifact>
That's all, <artist> friends."#;

/// Event trace without stream ids, for comparing runs
fn trace(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ArtifactDetected { id, content_type, title, .. } => {
                Some(format!("detected {} {} {}", id, content_type, title))
            }
            StreamEvent::ArtifactCompleted { block, .. } => Some(format!(
                "completed {} files={} valid={} errors={:?}",
                block.id,
                block.files.len(),
                block.valid,
                block.errors
            )),
            StreamEvent::ParseFailed { failure, .. } => Some(format!("failed {}", failure)),
            StreamEvent::StateTransition { .. } => None,
        })
        .collect()
}

fn run(fragments: &[&str]) -> (Vec<String>, String) {
    let mut parser = StreamParser::new();
    let mut events = Vec::new();
    for fragment in fragments {
        events.extend(parser.feed(fragment).unwrap());
    }
    events.extend(parser.finish().unwrap());
    (trace(&events), parser.prose().to_string())
}

fn char_boundaries(text: &str) -> Vec<usize> {
    text.char_indices().map(|(i, _)| i).skip(1).collect()
}

#[test]
fn test_every_two_way_split_matches_single_fragment() {
    let expected = run(&[MESSAGE]);
    assert_eq!(
        expected.0.iter().filter(|t| t.starts_with("completed")).count(),
        3
    );

    for split in char_boundaries(MESSAGE) {
        let (head, tail) = MESSAGE.split_at(split);
        assert_eq!(run(&[head, tail]), expected, "split at byte {}", split);
    }
}

#[test]
fn test_nested_self_closing_and_duplicate_ids_under_every_split() {
    let text = concat!(
        r#"<artifact identifier="outer" type="code"><description>Wrap with <artifact identifier="x" /> tags</description>"#,
        r#"<files><file path="a.txt"><![CDATA[x]]></file></files></artifact>"#,
        r#"<artifact identifier="outer" type="code"><files><file path="b.txt"><![CDATA[y]]></file></files></artifact> tail"#
    );
    let expected = run(&[text]);
    let completed: Vec<_> = expected.0.iter().filter(|t| t.starts_with("completed")).collect();
    assert_eq!(completed.len(), 2);
    assert!(completed[0].starts_with("completed outer files=1 valid=true"));
    assert!(completed[1].starts_with("completed artifact-2 files=1 valid=false"));
    assert_eq!(expected.1, " tail");

    for split in char_boundaries(text) {
        let (head, tail) = text.split_at(split);
        assert_eq!(run(&[head, tail]), expected, "split at byte {}", split);
    }

    let doc = parse_document(text);
    let ids: Vec<_> = doc.blocks.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["outer", "artifact-2"]);
}

#[test]
fn test_one_character_fragments_match_single_fragment() {
    let expected = run(&[MESSAGE]);
    let chars: Vec<String> = MESSAGE.chars().map(|c| c.to_string()).collect();
    let fragments: Vec<&str> = chars.iter().map(String::as_str).collect();
    assert_eq!(run(&fragments), expected);
}

#[test]
fn test_empty_fragments_are_harmless() {
    let expected = run(&[MESSAGE]);
    let (head, tail) = MESSAGE.split_at(120);
    assert_eq!(run(&["", head, "", "", tail, ""]), expected);
}

#[test]
fn test_multibyte_text_splits_on_char_boundaries() {
    let text = concat!(
        "Voilà · ",
        r#"<artifact identifier="ü" type="code" title="naïve"><files><file path="é.txt"><![CDATA[日本語]]></file></files></artifact>"#,
        " fin"
    );
    let expected = run(&[text]);
    for split in char_boundaries(text) {
        let (head, tail) = text.split_at(split);
        assert_eq!(run(&[head, tail]), expected);
    }
    assert_eq!(expected.1, "Voilà ·  fin");
}

#[test]
fn test_detection_precedes_completion_for_every_id() {
    let mut parser = StreamParser::new();
    let mut events = Vec::new();
    for chunk in MESSAGE.as_bytes().chunks(13) {
        events.extend(parser.feed(std::str::from_utf8(chunk).unwrap()).unwrap());
    }
    events.extend(parser.finish().unwrap());

    let trace = trace(&events);
    for id in ["fancy-button", "flow", "artifact-3"] {
        let detected = trace
            .iter()
            .position(|t| t.starts_with(&format!("detected {} ", id)))
            .unwrap();
        let completed = trace
            .iter()
            .position(|t| t.starts_with(&format!("completed {} ", id)))
            .unwrap();
        assert!(detected < completed, "{} completed before detection", id);
    }
}

#[test]
fn test_one_shot_parse_agrees_with_stream() {
    let doc = parse_document(MESSAGE);
    assert_eq!(doc.blocks.len(), 3);
    assert!(doc.failures.is_empty());

    let button = doc.find("fancy-button").unwrap();
    assert!(button.valid, "{:?}", button.errors);
    assert_eq!(button.dependencies.len(), 1);
    assert!(button.code().unwrap().contains("</artifact> <artifact >"));

    let html = doc.find("artifact-3").unwrap();
    assert!(!html.valid);
    assert!(html.has_error(ValidationErrorKind::MissingCdata));
    assert!(html.has_error(ValidationErrorKind::SchemaInvalid));
    assert_eq!(html.provenance, Provenance::Element);

    assert!(doc.prose.starts_with("Sure! Here is the component"));
    assert!(doc.prose.ends_with("That's all, <artist> friends."));
}

#[test]
fn test_aborted_tag_does_not_poison_later_artifacts() {
    let text = concat!(
        r#"<artifact identifier="bad" type="code" <p>stray</p>"#,
        "\n",
        r#"<artifact identifier="good" type="code"><files><file path="a.txt"><![CDATA[ok]]></file></files></artifact>"#
    );
    let doc = parse_document(text);
    assert_eq!(doc.blocks.len(), 1);
    assert_eq!(doc.blocks[0].id, "good");
    assert!(doc.prose.starts_with(r#"<artifact identifier="bad" type="code" <p>stray</p>"#));
}

#[test]
fn test_unterminated_tail_reports_failure_after_earlier_success() {
    let text = concat!(
        r#"<artifact identifier="one" type="code"><files><file path="a"><![CDATA[1]]></file></files></artifact>"#,
        r#"<artifact identifier="two" type="code"><files><file path="b"><![CDATA[2"#
    );
    let doc = parse_document(text);
    assert_eq!(doc.blocks.len(), 1);
    assert_eq!(doc.failures.len(), 1);
    assert_eq!(doc.failures[0].kind, ParseFailureKind::UnterminatedStream);
    assert_eq!(doc.failures[0].artifact_id.as_deref(), Some("two"));
    assert!(!doc.used_fallback());
}
