//! Preflight: config checks, context load, resume restore, collaborator
//! construction.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::error::{AidfError, AidfResult, ConfigCode};
use crate::domain::models::context::LoadedContext;
use crate::domain::models::execution::BlockedStatus;
use crate::domain::ports::Provider;
use crate::infrastructure::config::ConfigLoader;
use crate::services::context_loader::{ContextLoader, LoadOptions};
use crate::services::metrics::{phases, MetricsCollector};
use crate::services::scope_guard::ScopeGuard;
use crate::services::secret_scanner::SecretScanner;
use crate::services::validator::Validator;

use super::Executor;

/// Marker line holding the machine-readable resume breadcrumb.
pub(crate) const BREADCRUMB_PREFIX: &str = "- Blocked breadcrumb: ";

/// Everything the execution loop needs, built once.
pub struct PreFlightResult {
    pub context: LoadedContext,
    pub scope_guard: Arc<ScopeGuard>,
    pub scanner: Arc<SecretScanner>,
    pub validator: Validator,
    pub provider: Arc<dyn Provider>,
    pub blocked_status: Option<BlockedStatus>,
    /// Prior-wave summaries injected by the parallel scheduler.
    pub previous_summaries: Vec<String>,
}

impl Executor {
    pub(super) async fn preflight(
        &mut self,
        metrics: &mut MetricsCollector,
        previous_summaries: Vec<String>,
    ) -> AidfResult<PreFlightResult> {
        ConfigLoader::validate(&self.config)?;
        self.warn_on_plaintext_secrets();

        metrics.start_phase(phases::CONTEXT_LOADING);
        let loader = ContextLoader::new(&self.project_root)?;
        let context = loader.load_context(
            &self.task_path,
            &LoadOptions {
                previous_summaries: previous_summaries.clone(),
            },
        )?;
        metrics.end_phase(phases::CONTEXT_LOADING);
        info!(
            task_id = %context.task.id,
            estimated_tokens = context.estimated_tokens(),
            "context loaded"
        );

        let blocked_status = if self.options.resume {
            let breadcrumb = read_breadcrumb(&context.task.raw).ok_or_else(|| {
                AidfError::config(
                    ConfigCode::Invalid,
                    format!(
                        "--resume requested but {} carries no blocked breadcrumb",
                        self.task_path.display()
                    ),
                )
            })?;
            self.state.iteration = breadcrumb.iteration;
            for path in &breadcrumb.files_modified {
                self.state.files_modified.insert(path.clone());
            }
            info!(
                iteration = breadcrumb.iteration,
                files = breadcrumb.files_modified.len(),
                "resuming blocked task"
            );
            Some(breadcrumb)
        } else {
            None
        };

        if self.config.permissions.skip_permissions && self.config.permissions.warn_on_skip {
            warn!(
                "skip_permissions is enabled: the agent runs without permission prompts; \
                 scope enforcement is the only gate"
            );
        }

        let scope_guard = Arc::new(ScopeGuard::new(
            context.task.scope(),
            self.config.scope_enforcement,
        )?);
        let scanner = Arc::new(SecretScanner::new(self.config.secrets.clone()));
        let validator = Validator::new(self.config.validation.clone(), self.project_root.clone());
        let provider = (self.deps.provider_factory)(
            &self.config,
            self.project_root.clone(),
            Arc::clone(&scope_guard),
            Arc::clone(&scanner),
            Arc::clone(&self.deps.git),
        )?;

        Ok(PreFlightResult {
            context,
            scope_guard,
            scanner,
            validator,
            provider,
            blocked_status,
            previous_summaries,
        })
    }

    /// A literal key pasted into the config instead of a `$NAME` reference
    /// deserves a loud warning before it ends up in logs or reports.
    fn warn_on_plaintext_secrets(&self) {
        if let Some(key) = &self.config.provider.api_key {
            let scanner = SecretScanner::new(Default::default());
            if !scanner.scan(key).is_clean() {
                warn!(
                    "provider.api_key looks like a plaintext secret; \
                     prefer a $ENV_VAR reference in config.yml"
                );
            }
        }
    }
}

/// Pull the breadcrumb JSON out of a previously written status section.
pub(crate) fn read_breadcrumb(task_content: &str) -> Option<BlockedStatus> {
    task_content.lines().rev().find_map(|line| {
        line.trim()
            .strip_prefix(BREADCRUMB_PREFIX)
            .and_then(|json| serde_json::from_str(json).ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_breadcrumb() {
        let content = "## Status: BLOCKED\n- Iterations: 2\n- Blocked breadcrumb: {\"iteration\":2,\"files_modified\":[\"src/a.rs\"],\"reason\":\"validation kept failing\"}\n";
        let crumb = read_breadcrumb(content).unwrap();
        assert_eq!(crumb.iteration, 2);
        assert_eq!(crumb.files_modified, vec!["src/a.rs".to_string()]);
        assert_eq!(crumb.reason, "validation kept failing");
    }

    #[test]
    fn test_read_breadcrumb_absent() {
        assert!(read_breadcrumb("## Status: COMPLETED\n- Iterations: 1\n").is_none());
    }
}
