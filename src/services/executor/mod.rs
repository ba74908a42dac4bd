//! Three-phase single-task executor: preflight, execution loop, postflight.
//!
//! The executor owns its mutable [`ExecutorState`]; collaborators arrive
//! through [`ExecutorDeps`] so tests can inject mocks. Postflight runs even
//! when the loop aborts, so the task file always ends up in a terminal
//! directory with a written status.

mod execution;
mod postflight;
mod preflight;

pub use execution::LoopOutcome;
pub use preflight::PreFlightResult;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::domain::error::AidfError;
use crate::domain::models::config::Config;
use crate::domain::models::execution::{
    ExecutorResult, ExecutorState, ExecutorStatus, TerminationReason,
};
use crate::domain::ports::{GitClient, Notifier, Provider, ScopeApprover};
use crate::services::metrics::MetricsCollector;
use crate::services::parallel::claims::PathClaimIndex;
use crate::services::scope_guard::ScopeGuard;
use crate::services::secret_scanner::SecretScanner;

/// Per-run options from the CLI.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    /// Resume a blocked task from its breadcrumb.
    pub resume: bool,
    /// Build the first prompt and stop without calling the provider.
    pub dry_run: bool,
    /// Prior-wave summaries injected by the parallel scheduler.
    pub previous_summaries: Vec<String>,
}

/// Builds the provider once the scope guard and scanner exist.
pub type ProviderFactory = Arc<
    dyn Fn(
            &Config,
            PathBuf,
            Arc<ScopeGuard>,
            Arc<SecretScanner>,
            Arc<dyn GitClient>,
        ) -> crate::domain::error::AidfResult<Arc<dyn Provider>>
        + Send
        + Sync,
>;

/// Injected collaborator bundle.
pub struct ExecutorDeps {
    pub git: Arc<dyn GitClient>,
    pub notifier: Arc<dyn Notifier>,
    /// Answers ASK_USER decisions; absence means deny.
    pub approver: Option<Arc<dyn ScopeApprover>>,
    pub provider_factory: ProviderFactory,
    /// Present only under the parallel scheduler.
    pub claims: Option<Arc<PathClaimIndex>>,
    pub cancel: CancellationToken,
    /// Streaming output observer for the UI.
    pub on_output: Option<crate::domain::ports::OutputCallback>,
    /// Retry observer for the UI.
    pub on_retry: Option<crate::domain::ports::RetryCallback>,
}

impl ExecutorDeps {
    /// Production wiring: git CLI, log notifier, real provider factory.
    pub fn production(project_root: &std::path::Path) -> Self {
        Self {
            git: Arc::new(crate::infrastructure::git::GitCli::new(project_root)),
            notifier: Arc::new(crate::infrastructure::notify::LogNotifier),
            approver: None,
            provider_factory: Arc::new(|config, cwd, guard, scanner, git| {
                crate::infrastructure::providers::build_provider(config, cwd, guard, scanner, git)
            }),
            claims: None,
            cancel: CancellationToken::new(),
            on_output: None,
            on_retry: None,
        }
    }
}

pub struct Executor {
    config: Config,
    options: ExecutorOptions,
    deps: ExecutorDeps,
    project_root: PathBuf,
    task_path: PathBuf,
    state: ExecutorState,
    paused: Arc<AtomicBool>,
}

impl Executor {
    pub fn new(
        config: Config,
        options: ExecutorOptions,
        deps: ExecutorDeps,
        project_root: PathBuf,
        task_path: PathBuf,
    ) -> Self {
        Self {
            config,
            options,
            deps,
            project_root,
            task_path,
            state: ExecutorState::default(),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> &ExecutorState {
        &self.state
    }

    /// Handle that pauses the loop at the next iteration boundary.
    pub fn pause_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_paused(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Run the task end to end. Failures are reported in the result, never
    /// as a panic or a bare error.
    pub async fn run(&mut self) -> ExecutorResult {
        let started = Instant::now();
        self.state.status = ExecutorStatus::Running;
        self.state.started_at = Some(chrono::Utc::now());

        let mut metrics = MetricsCollector::new(
            self.task_path.display().to_string(),
            self.config.provider.kind.as_str().to_string(),
            self.config.provider.model.clone(),
            self.project_root.display().to_string(),
        );

        let summaries = self.options.previous_summaries.clone();
        let pre = match self.preflight(&mut metrics, summaries).await {
            Ok(pre) => pre,
            Err(err) => return self.preflight_failure(started, err),
        };

        let outcome = self.execution_loop(&pre, &mut metrics).await;
        self.postflight(pre, outcome, metrics, started).await
    }

    /// A failure before the context even loaded: nothing to move, nothing to
    /// summarize.
    fn preflight_failure(&mut self, started: Instant, err: AidfError) -> ExecutorResult {
        error!(error = %err, "preflight failed");
        self.state.status = ExecutorStatus::Failed;
        self.state.last_error = Some(err.clone());
        ExecutorResult {
            status: ExecutorStatus::Failed,
            iteration: self.state.iteration,
            files_modified: self.state.files_modified.iter().cloned().collect(),
            duration_ms: started.elapsed().as_millis() as u64,
            token_usage: self.state.token_usage,
            termination: TerminationReason::MaxFailures,
            error: Some(err),
            conflict: None,
            summary: None,
            report: None,
        }
    }
}
