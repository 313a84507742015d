//! Dependency resolution engine
//!
//! Runs the strategy chain over one artifact's code, using sibling blocks
//! from the same message as replacement material. The first strategy that
//! succeeds ends the chain. With a confidence floor configured, a success
//! below the floor is recorded and the chain continues instead.

use kiln_core::ResolutionConfig;
use serde::Serialize;
use tracing::{debug, info};

use crate::lookup::DependencyLookup;
use crate::strategies::{default_strategies, CodeChange, Strategy, StrategyId};

/// How one strategy fared during a resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The predicate did not match the code
    NotApplicable,
    /// The predicate matched but the transform could not complete
    Failed { reason: String },
    /// The transform succeeded below the configured confidence floor
    BelowFloor { confidence: f32 },
    /// The transform succeeded and ended the chain
    Succeeded { confidence: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyAttempt {
    pub strategy: StrategyId,
    pub priority: u32,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Result of one `resolve` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionResult {
    pub success: bool,
    /// Transformed code, or the input unchanged on failure
    pub code: String,
    pub changes: Vec<CodeChange>,
    pub confidence: f32,
    pub strategy: Option<StrategyId>,
    pub error: Option<String>,
    /// Every strategy evaluated, in evaluation order
    pub attempted: Vec<StrategyAttempt>,
}

impl ResolutionResult {
    fn failed(code: &str, error: String, attempted: Vec<StrategyAttempt>) -> Self {
        Self {
            success: false,
            code: code.to_string(),
            changes: Vec::new(),
            confidence: 0.0,
            strategy: None,
            error: Some(error),
            attempted,
        }
    }

    /// Whether any strategy got as far as running its transform
    pub fn any_applicable(&self) -> bool {
        self.attempted
            .iter()
            .any(|a| a.outcome != AttemptOutcome::NotApplicable)
    }
}

/// Priority-ordered strategy chain
#[derive(Debug, Clone)]
pub struct ResolutionEngine {
    strategies: Vec<Strategy>,
    config: ResolutionConfig,
}

impl ResolutionEngine {
    pub fn new() -> Self {
        Self::with_config(ResolutionConfig::default())
    }

    pub fn with_config(config: ResolutionConfig) -> Self {
        Self::with_strategies(default_strategies(), config)
    }

    /// Build an engine over a custom table; it is ordered by descending priority
    pub fn with_strategies(mut strategies: Vec<Strategy>, config: ResolutionConfig) -> Self {
        strategies.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { strategies, config }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Repair `code` using sibling blocks found in `message_text`
    pub fn resolve(&self, message_text: &str, code: &str) -> ResolutionResult {
        let lookup = DependencyLookup::from_message(message_text);
        self.resolve_with_lookup(&lookup, code)
    }

    /// Repair `code` against a prebuilt lookup
    pub fn resolve_with_lookup(&self, lookup: &DependencyLookup, code: &str) -> ResolutionResult {
        let mut attempted = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            if !(strategy.applies)(code, lookup) {
                debug!("Strategy {} not applicable", strategy.id);
                attempted.push(StrategyAttempt {
                    strategy: strategy.id,
                    priority: strategy.priority,
                    outcome: AttemptOutcome::NotApplicable,
                });
                continue;
            }

            match (strategy.apply)(code, lookup) {
                Ok(outcome) => {
                    let below_floor = self
                        .config
                        .min_confidence
                        .is_some_and(|floor| outcome.confidence < floor);
                    if below_floor {
                        debug!(
                            "Strategy {} succeeded at {:.2}, below the confidence floor",
                            strategy.id, outcome.confidence
                        );
                        attempted.push(StrategyAttempt {
                            strategy: strategy.id,
                            priority: strategy.priority,
                            outcome: AttemptOutcome::BelowFloor {
                                confidence: outcome.confidence,
                            },
                        });
                        continue;
                    }

                    info!(
                        "Resolved with {} ({} changes, confidence {:.2})",
                        strategy.id,
                        outcome.changes.len(),
                        outcome.confidence
                    );
                    attempted.push(StrategyAttempt {
                        strategy: strategy.id,
                        priority: strategy.priority,
                        outcome: AttemptOutcome::Succeeded {
                            confidence: outcome.confidence,
                        },
                    });
                    return ResolutionResult {
                        success: true,
                        code: outcome.code,
                        changes: outcome.changes,
                        confidence: outcome.confidence,
                        strategy: Some(strategy.id),
                        error: None,
                        attempted,
                    };
                }
                Err(reason) => {
                    debug!("Strategy {} failed: {}", strategy.id, reason);
                    attempted.push(StrategyAttempt {
                        strategy: strategy.id,
                        priority: strategy.priority,
                        outcome: AttemptOutcome::Failed { reason },
                    });
                }
            }
        }

        let error = if attempted
            .iter()
            .all(|a| a.outcome == AttemptOutcome::NotApplicable)
        {
            "no unresolved references found".to_string()
        } else {
            "no strategy produced an acceptable repair".to_string()
        };
        debug!("Resolution failed: {}", error);
        ResolutionResult::failed(code, error, attempted)
    }
}

impl Default for ResolutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUTTON: &str = "import styles from \"./Button.module.css\";\nexport const Button = () => <button className={styles.primary}>Go</button>;";

    #[test]
    fn test_style_module_example() {
        let message = "Here you go:\n```css\n.primary { background-color: blue; font-size: 16px; }\n```\n";
        let result = ResolutionEngine::new().resolve(message, BUTTON);

        assert!(result.success);
        assert_eq!(result.strategy, Some(StrategyId::StyleModule));
        assert_eq!(result.confidence, 1.0);
        assert!(result
            .code
            .starts_with("const styles = { primary: { backgroundColor: 'blue', fontSize: '16px' } };"));
        assert!(!result.code.contains("import"));
        assert_eq!(result.attempted.len(), 1);
    }

    #[test]
    fn test_json_example() {
        let message = "```json\n{ \"apiUrl\": \"https://api.example.com\", \"timeout\": 5000 }\n```";
        let code = "import config from \"./config.json\"; console.log(config.apiUrl);";
        let result = ResolutionEngine::new().resolve(message, code);

        assert!(result.success);
        assert_eq!(result.strategy, Some(StrategyId::JsonInline));
        assert_eq!(
            result.code,
            "const config = { \"apiUrl\": \"https://api.example.com\", \"timeout\": 5000 }; console.log(config.apiUrl);"
        );
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_unmatched_import_falls_through_to_removal() {
        let result = ResolutionEngine::new().resolve("no code here", BUTTON);

        assert!(result.success);
        assert_eq!(result.strategy, Some(StrategyId::ImportRemoval));
        assert_eq!(result.confidence, 0.3);
        assert!(result
            .code
            .starts_with("// Removed unresolved import: ./Button.module.css\n"));
        assert!(matches!(
            result.attempted[0].outcome,
            AttemptOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_no_references_is_noop_failure() {
        let code = "import React from 'react';\nexport default () => null;";
        let result = ResolutionEngine::new().resolve("```css\n.a{}\n```", code);

        assert!(!result.success);
        assert_eq!(result.code, code);
        assert!(result.changes.is_empty());
        assert_eq!(result.strategy, None);
        assert_eq!(result.attempted.len(), 4);
        assert!(!result.any_applicable());
        assert_eq!(result.error.as_deref(), Some("no unresolved references found"));
    }

    fn assert_noop(result: &ResolutionResult, code: &str) {
        assert!(!result.success);
        assert_eq!(result.code, code);
        assert!(result.changes.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.strategy, None);
        assert_eq!(result.error.as_deref(), Some("no unresolved references found"));
    }

    #[test]
    fn test_empty_input_is_noop_failure() {
        let engine = ResolutionEngine::new();
        assert_noop(&engine.resolve("", ""), "");

        let code = "export default function App() { return null; }";
        assert_noop(&engine.resolve("", code), code);
    }

    #[test]
    fn test_malformed_code_is_noop_failure() {
        let engine = ResolutionEngine::new();
        let message = "```css Button.module.css\n.a {}\n```";

        let unterminated = "import styles from \"./Button.module.css\nexport default () => null;";
        assert_noop(&engine.resolve(message, unterminated), unterminated);

        let stray_quote = "const label = 'oops;\nimport from;\n\"";
        assert_noop(&engine.resolve(message, stray_quote), stray_quote);

        let unterminated_message = "<artifact identifier=\"x\"><![CDATA[\n```css";
        assert_noop(&engine.resolve(unterminated_message, stray_quote), stray_quote);
    }

    #[test]
    fn test_first_success_wins_regardless_of_confidence() {
        let message = "```css\n.a { color: red; }\n```";
        let code = "import './theme.css';\nimport data from './data.json';";
        let result = ResolutionEngine::new().resolve(message, code);

        assert_eq!(result.strategy, Some(StrategyId::StyleInjection));
        assert!(result.confidence < 1.0);
        assert!(result.code.contains("import data from './data.json';"));
    }

    #[test]
    fn test_confidence_floor_continues_chain() {
        let engine = ResolutionEngine::with_config(ResolutionConfig {
            min_confidence: Some(0.7),
        });
        let message = "```css\n.a { color: red; }\n```";
        let result = engine.resolve(message, "import './theme.css';");

        assert!(!result.success);
        assert!(matches!(
            result.attempted[1].outcome,
            AttemptOutcome::BelowFloor { .. }
        ));
        assert!(matches!(
            result.attempted[3].outcome,
            AttemptOutcome::BelowFloor { .. }
        ));
        assert_eq!(result.code, "import './theme.css';");
    }

    #[test]
    fn test_custom_table_is_sorted() {
        let mut strategies = default_strategies();
        strategies.reverse();
        let engine = ResolutionEngine::with_strategies(strategies, ResolutionConfig::default());
        let ids: Vec<StrategyId> = engine.strategies().iter().map(|s| s.id).collect();
        assert_eq!(
            ids,
            vec![
                StrategyId::StyleModule,
                StrategyId::StyleInjection,
                StrategyId::JsonInline,
                StrategyId::ImportRemoval
            ]
        );
    }
}
