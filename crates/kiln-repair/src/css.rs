//! Minimal stylesheet reading for style-module replacement
//!
//! Only top-level rules with plain class selectors become object entries.
//! At-rules, pseudo-classes and compound selectors are skipped.

/// One class selector with its declarations, in source order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRule {
    pub class: String,
    pub declarations: Vec<(String, String)>,
}

/// Remove `/* ... */` comments
pub fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Parse class rules from a stylesheet. Repeated classes are merged and later
/// declarations override earlier ones.
pub fn parse_class_rules(css: &str) -> Vec<ClassRule> {
    let css = strip_comments(css);
    let mut rules: Vec<ClassRule> = Vec::new();
    let mut rest = css.as_str();

    while let Some(open) = rest.find('{') {
        let selector = rest[..open].trim();
        let Some(body_len) = block_len(&rest[open + 1..]) else {
            break;
        };
        let body = &rest[open + 1..open + 1 + body_len];
        rest = &rest[open + 1 + body_len + 1..];

        if selector.starts_with('@') {
            continue;
        }

        let declarations = parse_declarations(body);
        for class in selector.split(',').filter_map(|s| simple_class(s.trim())) {
            match rules.iter_mut().find(|r| r.class == class) {
                Some(rule) => {
                    for (prop, value) in &declarations {
                        match rule.declarations.iter_mut().find(|(p, _)| p == prop) {
                            Some(existing) => existing.1 = value.clone(),
                            None => rule.declarations.push((prop.clone(), value.clone())),
                        }
                    }
                }
                None => rules.push(ClassRule {
                    class: class.to_string(),
                    declarations: declarations.clone(),
                }),
            }
        }
    }

    rules
}

/// Length of a brace block body, given the text just after its `{`
fn block_len(text: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn simple_class(selector: &str) -> Option<&str> {
    let class = selector.strip_prefix('.')?;
    let mut chars = class.chars();
    let first = chars.next()?;
    let valid = (first.is_ascii_alphabetic() || first == '_' || first == '-')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(class)
}

/// `prop: value; ...` pairs with camel-cased property names
fn parse_declarations(body: &str) -> Vec<(String, String)> {
    body.split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let prop = prop.trim();
            let value = value.trim();
            let value = value
                .strip_suffix("!important")
                .map(str::trim_end)
                .unwrap_or(value);
            if prop.is_empty() || value.is_empty() || prop.contains(['{', '}']) {
                return None;
            }
            Some((camel_case(prop), value.to_string()))
        })
        .collect()
}

/// `background-color` → `backgroundColor`, `-webkit-box` → `WebkitBox`.
/// Custom properties (`--accent`) are kept verbatim.
pub fn camel_case(property: &str) -> String {
    if property.starts_with("--") {
        return property.to_string();
    }

    let mut out = String::with_capacity(property.len());
    let mut upper = property.starts_with('-');
    for c in property.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c.to_ascii_lowercase());
        }
    }
    out
}

fn object_key(key: &str) -> String {
    let mut chars = key.chars();
    let identifier = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if identifier {
        key.to_string()
    } else {
        format!("'{}'", escape_single(key))
    }
}

fn escape_single(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Render rules as an object literal:
/// `{ primary: { backgroundColor: 'blue', fontSize: '16px' } }`
pub fn to_object_literal(rules: &[ClassRule]) -> String {
    if rules.is_empty() {
        return "{}".to_string();
    }

    let entries: Vec<String> = rules
        .iter()
        .map(|rule| {
            let declarations: Vec<String> = rule
                .declarations
                .iter()
                .map(|(prop, value)| format!("{}: '{}'", object_key(prop), escape_single(value)))
                .collect();
            if declarations.is_empty() {
                format!("{}: {{}}", object_key(&rule.class))
            } else {
                format!("{}: {{ {} }}", object_key(&rule.class), declarations.join(", "))
            }
        })
        .collect();

    format!("{{ {} }}", entries.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_module() {
        let rules = parse_class_rules(".primary { background-color: blue; font-size: 16px; }");
        assert_eq!(
            to_object_literal(&rules),
            "{ primary: { backgroundColor: 'blue', fontSize: '16px' } }"
        );
    }

    #[test]
    fn test_skips_at_rules_and_complex_selectors() {
        let css = r#"
/* header */
@media (max-width: 600px) { .primary { color: red; } }
.primary:hover { color: green; }
.card .title { margin: 0; }
.card, .panel { padding: 4px !important; }
"#;
        let rules = parse_class_rules(css);
        let classes: Vec<&str> = rules.iter().map(|r| r.class.as_str()).collect();
        assert_eq!(classes, vec!["card", "panel"]);
        assert_eq!(rules[0].declarations, vec![("padding".to_string(), "4px".to_string())]);
    }

    #[test]
    fn test_repeated_class_merges() {
        let rules = parse_class_rules(".a { color: red; margin: 0 } .a { color: blue; }");
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules[0].declarations,
            vec![
                ("color".to_string(), "blue".to_string()),
                ("margin".to_string(), "0".to_string())
            ]
        );
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("border-top-left-radius"), "borderTopLeftRadius");
        assert_eq!(camel_case("-webkit-transition"), "WebkitTransition");
        assert_eq!(camel_case("--brand-color"), "--brand-color");
        assert_eq!(camel_case("COLOR"), "color");
    }

    #[test]
    fn test_quoting() {
        let rules = parse_class_rules(".btn-large { --gap: 2px; font-family: 'Inter', sans-serif; }");
        assert_eq!(
            to_object_literal(&rules),
            r#"{ 'btn-large': { '--gap': '2px', fontFamily: '\'Inter\', sans-serif' } }"#
        );
    }

    #[test]
    fn test_unterminated_block_ignored() {
        assert!(parse_class_rules(".a { color: red;").is_empty());
        assert_eq!(strip_comments("a /* b"), "a ");
    }
}
