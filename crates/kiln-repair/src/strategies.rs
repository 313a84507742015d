//! Repair strategy table
//!
//! Each strategy is a plain `(priority, predicate, transform)` value. The
//! engine tries them in descending priority; adding a strategy means adding a
//! row to [`default_strategies`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::OnceLock;

use crate::css::{parse_class_rules, to_object_literal};
use crate::lookup::{DependencyLookup, MatchQuality, SiblingKind};

/// Strategy identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    /// CSS module import → selector-keyed object
    StyleModule,
    /// Plain stylesheet import → injected style element
    StyleInjection,
    /// JSON import → inline literal
    JsonInline,
    /// Unresolvable relative import → comment
    ImportRemoval,
}

impl StrategyId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::StyleModule => "style_module",
            StrategyId::StyleInjection => "style_injection",
            StrategyId::JsonInline => "json_inline",
            StrategyId::ImportRemoval => "import_removal",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What an edit did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ImportReplaced,
    StyleInjected,
    ImportRemoved,
}

/// 1-based position in the original code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    fn of(code: &str, offset: usize) -> Self {
        let before = &code[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        Self {
            line,
            column: before[line_start..].chars().count() + 1,
        }
    }
}

/// One structural edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChange {
    pub kind: ChangeKind,
    pub before: String,
    pub after: String,
    pub location: SourceLocation,
    pub description: String,
}

/// Result of a successful transform
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutcome {
    pub code: String,
    pub changes: Vec<CodeChange>,
    pub confidence: f32,
}

pub type Predicate = fn(&str, &DependencyLookup) -> bool;
pub type Transform = fn(&str, &DependencyLookup) -> Result<StrategyOutcome, String>;

/// A row of the strategy table
#[derive(Clone, Copy)]
pub struct Strategy {
    pub id: StrategyId,
    pub priority: u32,
    pub applies: Predicate,
    pub apply: Transform,
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish()
    }
}

/// The built-in chain
pub fn default_strategies() -> Vec<Strategy> {
    vec![
        Strategy {
            id: StrategyId::StyleModule,
            priority: 100,
            applies: has_style_module_import,
            apply: replace_style_modules,
        },
        Strategy {
            id: StrategyId::StyleInjection,
            priority: 90,
            applies: has_injectable_style_import,
            apply: inject_styles,
        },
        Strategy {
            id: StrategyId::JsonInline,
            priority: 80,
            applies: has_json_import,
            apply: inline_json,
        },
        Strategy {
            id: StrategyId::ImportRemoval,
            priority: 10,
            applies: has_relative_import,
            apply: remove_relative_imports,
        },
    ]
}

const REMOVAL_CONFIDENCE: f32 = 0.3;
const INJECTION_BASE_CONFIDENCE: f32 = 0.85;

/// An import statement found in code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    /// Byte range of the statement, including a trailing `;`
    pub range: Range<usize>,
    /// Default or namespace binding, if any
    pub alias: Option<String>,
    pub specifier: String,
}

impl ImportStatement {
    pub fn text<'a>(&self, code: &'a str) -> &'a str {
        &code[self.range.clone()]
    }

    pub fn is_relative(&self) -> bool {
        ["./", "../", "/", "@/"]
            .iter()
            .any(|p| self.specifier.starts_with(p))
    }

    fn extension(&self) -> Option<String> {
        let name = self.specifier.rsplit('/').next()?;
        name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
    }

    pub fn is_style(&self) -> bool {
        matches!(self.extension().as_deref(), Some("css" | "scss" | "sass" | "less"))
    }

    pub fn is_style_module(&self) -> bool {
        self.is_style() && self.specifier.to_ascii_lowercase().contains(".module.")
    }

    pub fn is_json(&self) -> bool {
        self.extension().as_deref() == Some("json")
    }
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\bimport\s+(?:(?P<clause>[^'";]+?)\s+from\s+)?["'](?P<spec>[^"'\n]+)["'][ \t]*;?"#,
        )
        .expect("valid import regex")
    })
}

/// Every import statement in `code` that starts a line or follows a `;`,
/// in order
pub fn find_imports(code: &str) -> Vec<ImportStatement> {
    import_regex()
        .captures_iter(code)
        .filter_map(|caps| {
            let stmt = caps.get(0)?;
            let before = code[..stmt.start()].trim_end_matches([' ', '\t']);
            if !(before.is_empty() || before.ends_with('\n') || before.ends_with(';')) {
                return None;
            }
            Some(ImportStatement {
                range: stmt.range(),
                alias: caps.name("clause").and_then(|c| default_binding(c.as_str())),
                specifier: caps.name("spec")?.as_str().to_string(),
            })
        })
        .collect()
}

/// `styles` from `styles`, `* as styles` or `styles, { a }`
fn default_binding(clause: &str) -> Option<String> {
    let clause = clause.trim();
    let head = clause.split(',').next()?.trim();
    let name = head.strip_prefix("* as ").map(str::trim).unwrap_or(head);
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    valid.then(|| name.to_string())
}

/// Apply non-overlapping edits in one pass
fn rewrite(code: &str, edits: &[(Range<usize>, String)]) -> String {
    let mut sorted: Vec<&(Range<usize>, String)> = edits.iter().collect();
    sorted.sort_by_key(|(range, _)| range.start);

    let mut out = String::with_capacity(code.len());
    let mut last = 0;
    for (range, replacement) in sorted {
        out.push_str(&code[last..range.start]);
        out.push_str(replacement);
        last = range.end;
    }
    out.push_str(&code[last..]);
    out
}

fn change(
    code: &str,
    import: &ImportStatement,
    kind: ChangeKind,
    after: String,
    description: String,
) -> CodeChange {
    CodeChange {
        kind,
        before: import.text(code).to_string(),
        after,
        location: SourceLocation::of(code, import.range.start),
        description,
    }
}

fn finish(
    code: &str,
    edits: Vec<(Range<usize>, String)>,
    changes: Vec<CodeChange>,
    confidence: f32,
) -> StrategyOutcome {
    StrategyOutcome {
        code: rewrite(code, &edits),
        changes,
        confidence,
    }
}

fn has_style_module_import(code: &str, _: &DependencyLookup) -> bool {
    find_imports(code)
        .iter()
        .any(|i| i.is_style_module() && i.alias.is_some())
}

fn replace_style_modules(code: &str, lookup: &DependencyLookup) -> Result<StrategyOutcome, String> {
    let mut edits = Vec::new();
    let mut changes = Vec::new();
    let mut missing = Vec::new();

    for import in find_imports(code).iter().filter(|i| i.is_style_module()) {
        let Some(alias) = &import.alias else {
            continue;
        };
        let Some((sibling, _)) = lookup.find(&import.specifier, SiblingKind::Style) else {
            missing.push(import.specifier.clone());
            continue;
        };

        let rules = parse_class_rules(&sibling.content);
        let replacement = format!("const {} = {};", alias, to_object_literal(&rules));
        changes.push(change(
            code,
            import,
            ChangeKind::ImportReplaced,
            replacement.clone(),
            format!(
                "Replaced style module '{}' with {} class mappings",
                import.specifier,
                rules.len()
            ),
        ));
        edits.push((import.range.clone(), replacement));
    }

    if edits.is_empty() {
        return Err(format!("no sibling stylesheet for {}", missing.join(", ")));
    }
    Ok(finish(code, edits, changes, 1.0))
}

fn has_injectable_style_import(code: &str, lookup: &DependencyLookup) -> bool {
    let imports = find_imports(code);
    !imports.iter().any(ImportStatement::is_style_module)
        && imports
            .iter()
            .any(|i| i.is_style() && lookup.find(&i.specifier, SiblingKind::Style).is_some())
}

fn injection_confidence(quality: MatchQuality, css: &str) -> f32 {
    let mut confidence = INJECTION_BASE_CONFIDENCE;
    confidence -= match quality {
        MatchQuality::Exact => 0.0,
        MatchQuality::Stem => 0.1,
        MatchQuality::LoneUnnamed => 0.2,
    };
    if css.contains("@import") || css.contains("url(") {
        confidence -= 0.1;
    }
    confidence.clamp(0.3, 0.9)
}

fn escape_template(css: &str) -> String {
    css.replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${")
}

fn inject_styles(code: &str, lookup: &DependencyLookup) -> Result<StrategyOutcome, String> {
    let mut edits = Vec::new();
    let mut changes = Vec::new();
    let mut confidence = f32::MAX;

    for import in find_imports(code).iter().filter(|i| i.is_style()) {
        let Some((sibling, quality)) = lookup.find(&import.specifier, SiblingKind::Style) else {
            continue;
        };

        let mut replacement = format!(
            "(() => {{ const style = document.createElement('style'); style.textContent = `{}`; document.head.appendChild(style); }})();",
            escape_template(&sibling.content)
        );
        if let Some(alias) = &import.alias {
            replacement.push_str(&format!(
                "\nconst {} = new Proxy({{}}, {{ get: (_, key) => key }});",
                alias
            ));
        }

        confidence = confidence.min(injection_confidence(quality, &sibling.content));
        changes.push(change(
            code,
            import,
            ChangeKind::StyleInjected,
            replacement.clone(),
            format!("Injected stylesheet '{}' into the document", import.specifier),
        ));
        edits.push((import.range.clone(), replacement));
    }

    if edits.is_empty() {
        return Err("no stylesheet import has a sibling block".to_string());
    }
    Ok(finish(code, edits, changes, confidence))
}

fn has_json_import(code: &str, _: &DependencyLookup) -> bool {
    find_imports(code)
        .iter()
        .any(|i| i.is_json() && i.alias.is_some())
}

fn inline_json(code: &str, lookup: &DependencyLookup) -> Result<StrategyOutcome, String> {
    let mut edits = Vec::new();
    let mut changes = Vec::new();
    let mut problems = Vec::new();

    for import in find_imports(code).iter().filter(|i| i.is_json()) {
        let Some(alias) = &import.alias else {
            continue;
        };
        let Some((sibling, _)) = lookup.find(&import.specifier, SiblingKind::Json) else {
            problems.push(format!("no sibling for {}", import.specifier));
            continue;
        };

        let literal = sibling.content.trim();
        if let Err(e) = serde_json::from_str::<serde_json::Value>(literal) {
            problems.push(format!("sibling for {} is not valid JSON: {}", import.specifier, e));
            continue;
        }

        let replacement = format!("const {} = {};", alias, literal);
        changes.push(change(
            code,
            import,
            ChangeKind::ImportReplaced,
            replacement.clone(),
            format!("Inlined JSON '{}'", import.specifier),
        ));
        edits.push((import.range.clone(), replacement));
    }

    if edits.is_empty() {
        return Err(problems.join("; "));
    }
    Ok(finish(code, edits, changes, 1.0))
}

fn has_relative_import(code: &str, _: &DependencyLookup) -> bool {
    find_imports(code).iter().any(ImportStatement::is_relative)
}

fn remove_relative_imports(code: &str, _: &DependencyLookup) -> Result<StrategyOutcome, String> {
    let mut edits = Vec::new();
    let mut changes = Vec::new();

    for import in find_imports(code).iter().filter(|i| i.is_relative()) {
        let rest_of_line = code[import.range.end..].split('\n').next().unwrap_or("");
        let replacement = if rest_of_line.trim().is_empty() {
            format!("// Removed unresolved import: {}", import.specifier)
        } else {
            format!("/* Removed unresolved import: {} */", import.specifier)
        };
        changes.push(change(
            code,
            import,
            ChangeKind::ImportRemoved,
            replacement.clone(),
            format!("Removed unresolvable import '{}'", import.specifier),
        ));
        edits.push((import.range.clone(), replacement));
    }

    if edits.is_empty() {
        return Err("no relative imports".to_string());
    }
    Ok(finish(code, edits, changes, REMOVAL_CONFIDENCE))
}
