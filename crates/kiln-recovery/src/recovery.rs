//! Render recovery pipeline
//!
//! Renders an artifact through an external collaborator. The first attempt
//! uses the artifact's own code; once an attempt has failed, the dependency
//! resolution engine runs once over the message and later attempts use the
//! repaired code when the repair succeeded.

use async_trait::async_trait;
use kiln_core::{ArtifactBlock, KilnConfig};
use kiln_repair::{ResolutionEngine, ResolutionResult};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::circuit_breaker::CircuitBreaker;
use crate::retry::{AttemptRecord, RetryController, RetryError};

/// Outcome reported by the render collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    Failed { diagnostic: Option<String> },
}

impl RenderOutcome {
    pub fn failed(diagnostic: impl Into<String>) -> Self {
        RenderOutcome::Failed {
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// Sandboxed render/execution environment (allows mocking in tests)
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, artifact_id: &str, code: &str) -> RenderOutcome;
}

/// A successful recovery
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub artifact_id: String,
    /// The code that rendered
    pub code: String,
    /// Whether that code came from the resolution engine
    pub repaired: bool,
    /// Resolution run after the first failure, if any
    pub resolution: Option<ResolutionResult>,
    pub attempts: Vec<AttemptRecord>,
}

/// Render, repair and bounded retry for artifacts
#[derive(Debug, Clone)]
pub struct ArtifactRecovery {
    controller: RetryController,
    engine: ResolutionEngine,
}

impl ArtifactRecovery {
    /// Build a pipeline over a shared breaker
    pub fn new(breaker: Arc<CircuitBreaker>, config: &KilnConfig) -> Self {
        Self {
            controller: RetryController::new(breaker, config.retry),
            engine: ResolutionEngine::with_config(config.resolution),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.controller.breaker()
    }

    /// Render `block`, repairing it from `message` after the first failure
    pub async fn recover<R>(
        &self,
        message: &str,
        block: &ArtifactBlock,
        renderer: &R,
    ) -> Result<RecoveryReport, RetryError>
    where
        R: Renderer + ?Sized,
    {
        let id = block.id.as_str();
        let original = block.code().ok_or_else(|| RetryError::NoCode { id: id.to_string() })?;
        let repair: OnceLock<ResolutionResult> = OnceLock::new();
        let engine = &self.engine;
        let repair_ref = &repair;

        let attempted = self
            .controller
            .execute(id, move |attempt| async move {
                let code = if attempt == 1 {
                    original
                } else {
                    let resolution = repair_ref.get_or_init(|| {
                        debug!("Resolving dependencies for {} after a failed render", id);
                        engine.resolve(message, original)
                    });
                    if resolution.success {
                        resolution.code.as_str()
                    } else {
                        original
                    }
                };

                match renderer.render(id, code).await {
                    RenderOutcome::Rendered => Ok(code.to_string()),
                    RenderOutcome::Failed { diagnostic } => {
                        Err(diagnostic.unwrap_or_else(|| "render failed".to_string()))
                    }
                }
            })
            .await?;

        let resolution = repair.into_inner();
        let repaired = resolution
            .as_ref()
            .is_some_and(|r| r.success && r.code == attempted.value);
        info!(
            "Recovered {} after {} attempts (repaired={})",
            id,
            attempted.attempts.len(),
            repaired
        );

        Ok(RecoveryReport {
            artifact_id: id.to_string(),
            code: attempted.value,
            repaired,
            resolution,
            attempts: attempted.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{ArtifactFile, ContentType, Provenance};
    use std::sync::Mutex;

    /// Fails any code that still imports a relative path
    #[derive(Default)]
    struct ImportRejectingRenderer {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Renderer for ImportRejectingRenderer {
        async fn render(&self, _artifact_id: &str, code: &str) -> RenderOutcome {
            self.seen.lock().unwrap().push(code.to_string());
            if code.contains("from \"./") || code.contains("from './") {
                RenderOutcome::failed("Module not found")
            } else {
                RenderOutcome::Rendered
            }
        }
    }

    fn block(id: &str, code: &str) -> ArtifactBlock {
        ArtifactBlock {
            id: id.to_string(),
            content_type: ContentType::React,
            title: id.to_string(),
            description: None,
            dependencies: Vec::new(),
            files: vec![ArtifactFile {
                path: "App.jsx".to_string(),
                content: code.to_string(),
            }],
            valid: true,
            errors: Vec::new(),
            raw: String::new(),
            provenance: Provenance::Element,
            confidence: 1.0,
        }
    }

    fn pipeline() -> ArtifactRecovery {
        let mut config = KilnConfig::default();
        config.retry.initial_backoff_ms = 1;
        config.retry.per_attempt_timeout_ms = 1_000;
        ArtifactRecovery::new(Arc::new(CircuitBreaker::default()), &config)
    }

    #[tokio::test]
    async fn test_repair_used_after_first_failure() {
        let message = "```json config.json\n{\"a\": 1}\n```";
        let code = "import config from './config.json';\nexport default () => config.a;";
        let renderer = ImportRejectingRenderer::default();

        let report = pipeline()
            .recover(message, &block("app", code), &renderer)
            .await
            .unwrap();

        assert!(report.repaired);
        assert_eq!(report.attempts.len(), 2);
        assert!(report.code.starts_with("const config = {\"a\": 1};"));
        assert_eq!(renderer.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clean_code_renders_first_time() {
        let renderer = ImportRejectingRenderer::default();
        let report = pipeline()
            .recover("", &block("ok", "export default () => null;"), &renderer)
            .await
            .unwrap();

        assert!(!report.repaired);
        assert!(report.resolution.is_none());
        assert_eq!(report.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_block_without_files() {
        let mut empty = block("empty", "");
        empty.files.clear();
        let err = pipeline()
            .recover("", &empty, &ImportRejectingRenderer::default())
            .await
            .unwrap_err();
        assert_eq!(err, RetryError::NoCode { id: "empty".to_string() });
    }
}
