//! # kiln-repair
//!
//! Repairs artifact code whose imports cannot be resolved inside an isolated
//! render sandbox.
//!
//! Generated components often import stylesheets or data files that the
//! message shows elsewhere as separate code blocks. The engine finds those
//! sibling blocks and rewrites the imports:
//!
//! | Priority | Strategy | Rewrite |
//! |---|---|---|
//! | 100 | `style_module` | `import s from "./x.module.css"` → selector-keyed object |
//! | 90 | `style_injection` | plain stylesheet import → injected `<style>` element |
//! | 80 | `json_inline` | `import c from "./c.json"` → inline literal |
//! | 10 | `import_removal` | any relative import left → comment |
//!
//! Resolution never fails with an error: an unrepairable input yields a
//! failed [`ResolutionResult`] carrying the strategies that were evaluated.

pub mod css;
mod engine;
mod lookup;
mod strategies;

pub use engine::{AttemptOutcome, ResolutionEngine, ResolutionResult, StrategyAttempt};
pub use lookup::{DependencyLookup, MatchQuality, SiblingBlock, SiblingKind};
pub use strategies::{
    default_strategies, find_imports, ChangeKind, CodeChange, ImportStatement, SourceLocation,
    Strategy, StrategyId, StrategyOutcome,
};
