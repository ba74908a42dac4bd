//! The iteration loop: prompt, provider call, scope enforcement,
//! validation, commit.

use rand::Rng;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::domain::error::{
    AidfError, ErrorCategory, GitCode, ProviderCode, ScopeCode, TimeoutCode,
};
use crate::domain::models::execution::{
    ClaimConflict, CompletionSignal, ExecutorStatus, TerminationReason,
};
use crate::domain::models::task::FileChange;
use crate::domain::ports::ExecuteOptions;
use crate::services::metrics::{phases, IterationRecord, MetricsCollector};
use crate::services::scope_guard::ScopeDecision;
use crate::services::token_budget::TokenBudget;

use super::{Executor, PreFlightResult};

/// What the loop decided, handed to postflight.
pub struct LoopOutcome {
    pub termination: TerminationReason,
    pub accumulated_output: String,
    pub conflict: Option<ClaimConflict>,
    pub warnings: Vec<String>,
}

/// Control flow of one iteration.
enum IterationFlow {
    Continue,
    Exit(TerminationReason),
}

impl Executor {
    pub(super) async fn execution_loop(
        &mut self,
        pre: &PreFlightResult,
        metrics: &mut MetricsCollector,
    ) -> LoopOutcome {
        let mut budget = TokenBudget::new(self.config.rate_limit.token_budget);
        let mut outcome = LoopOutcome {
            termination: TerminationReason::MaxIterations,
            accumulated_output: String::new(),
            conflict: None,
            warnings: Vec::new(),
        };
        let mut pending_validation: Option<AidfError> = None;

        loop {
            let max_iterations = self.config.execution.max_iterations;
            let first_pass = self.state.iteration == 0;
            if !(self.state.iteration < max_iterations || (self.options.dry_run && first_pass)) {
                outcome.termination = TerminationReason::MaxIterations;
                self.state.status = ExecutorStatus::Failed;
                break;
            }
            if self.state.consecutive_failures >= self.config.execution.max_consecutive_failures {
                outcome.termination = TerminationReason::MaxFailures;
                self.block_on_failures();
                break;
            }
            if self.deps.cancel.is_cancelled() {
                outcome.termination = TerminationReason::Cancelled;
                self.revert_uncommitted().await;
                break;
            }
            if self.is_paused() {
                self.state.status = ExecutorStatus::Paused;
                outcome.termination = TerminationReason::Cancelled;
                break;
            }

            self.state.iteration += 1;
            let iteration = self.state.iteration;
            let iteration_started = std::time::Instant::now();

            let prompt = self.build_prompt(pre, iteration, pending_validation.as_ref());
            if self.options.dry_run {
                info!(iteration, prompt_len = prompt.len(), "dry run: prompt built, stopping");
                debug!(prompt = %prompt, "dry-run prompt");
                self.state.status = ExecutorStatus::Idle;
                outcome.termination = TerminationReason::DryRun;
                break;
            }
            pending_validation = None;

            // Provider call under the iteration timeout, cancellable.
            metrics.start_phase(phases::AI_EXECUTION);
            let timeout_ms = self.config.execution.iteration_timeout_ms;
            let opts = ExecuteOptions {
                timeout_ms,
                conversation_state: self.continuation_state(pre),
                on_output: self.deps.on_output.clone(),
                on_retry: self.deps.on_retry.clone(),
            };
            let cancel = self.deps.cancel.clone();
            let call = timeout(Duration::from_millis(timeout_ms), pre.provider.execute(&prompt, &opts));
            let raced = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = call => Some(result),
            };
            metrics.end_phase(phases::AI_EXECUTION);
            let Some(raced) = raced else {
                outcome.termination = TerminationReason::Cancelled;
                self.revert_uncommitted().await;
                break;
            };
            let result = match raced {
                Ok(inner) => inner,
                Err(_) => Err(AidfError::timeout(
                    TimeoutCode::IterationTimeout,
                    format!("iteration {iteration} exceeded {timeout_ms} ms"),
                )),
            };

            let result = match result {
                Ok(result) => result,
                Err(err) => {
                    metrics.record_error(&err);
                    match self.dispatch_provider_failure(&err).await {
                        IterationFlow::Continue => continue,
                        IterationFlow::Exit(reason) => {
                            outcome.termination = reason;
                            break;
                        }
                    }
                }
            };

            // Token accounting before anything can short-circuit.
            if let Some(usage) = result.token_usage {
                self.state.token_usage.add(&usage);
                budget.record(&usage);
                metrics.record_token_usage(&usage);
            }
            self.state.conversation_state = result.conversation_state.clone();

            // Secret scan of the raw output, per configured mode.
            let mut output = result.output.clone();
            let scan = pre.scanner.scan(&output);
            if !scan.is_clean() {
                warn!(findings = scan.findings.len(), "secret material in agent output");
                outcome.warnings.push(format!(
                    "iteration {iteration}: {} secret finding(s) in output",
                    scan.findings.len()
                ));
                if scan.should_block() {
                    self.state.consecutive_failures += 1;
                    self.state.last_error = Some(AidfError::permission(
                        crate::domain::error::PermissionCode::FileAccess,
                        "agent output contained secret material (secrets.mode=block)",
                    ));
                    continue;
                }
                output = scan.output;
            }
            outcome.accumulated_output.push_str(&output);
            outcome.accumulated_output.push('\n');

            let mut signal = result.completion_signal.clone();
            let changes = result.files_changed.clone();

            // Runtime claims (parallel mode only): losing a claim cancels
            // this task; it re-runs serialized after the winner.
            if let Some(claims) = self.deps.claims.clone() {
                let paths: Vec<String> = changes.iter().map(|c| c.path.clone()).collect();
                if let Err(conflict) = claims.claim_all(&paths, &pre.context.task.id) {
                    warn!(
                        path = %conflict.path,
                        winner = %conflict.winner,
                        "runtime conflict: discarding in-flight work"
                    );
                    self.revert_changes(&paths, metrics).await;
                    claims.release_task(&pre.context.task.id);
                    self.state.status = ExecutorStatus::Idle;
                    outcome.conflict = Some(conflict);
                    outcome.termination = TerminationReason::Cancelled;
                    break;
                }
            }

            // Scope enforcement.
            metrics.start_phase(phases::SCOPE_CHECKING);
            let decision = pre.scope_guard.check(&changes);
            metrics.end_phase(phases::SCOPE_CHECKING);
            match decision {
                ScopeDecision::Allow => {
                    self.state.record_files(&changes);
                }
                ScopeDecision::AskUser { files } => {
                    let approved = match &self.deps.approver {
                        Some(approver) => approver.ask(&files).await,
                        None => false,
                    };
                    if approved {
                        pre.scope_guard.approve(files.iter().cloned());
                        self.state.record_files(&changes);
                    } else {
                        let err = AidfError::scope(
                            ScopeCode::UserDenied,
                            files.clone(),
                            "user denied the requested file changes",
                        );
                        metrics.record_error(&err);
                        self.revert_changes(&files, metrics).await;
                        self.state.status = ExecutorStatus::Failed;
                        self.state.last_error = Some(err);
                        outcome.termination = TerminationReason::MaxFailures;
                        break;
                    }
                }
                ScopeDecision::Block { files, error, .. } => {
                    metrics.record_error(&error);
                    metrics.record_scope_violation(&files);
                    if !self.revert_changes(&files, metrics).await {
                        outcome.termination = TerminationReason::MaxFailures;
                        break;
                    }
                    self.state.record_files(&changes);
                    self.state.remove_files(&files);
                    self.state.consecutive_failures += 1;
                    self.state.last_error = Some(error);
                    if signal.is_some() && !self.config.allow_completion_despite_scope_violation {
                        // The conservative default: a signal in a violating
                        // iteration does not count.
                        signal = None;
                    }
                    if signal.is_none() {
                        continue;
                    }
                }
            }

            metrics.record_iteration(IterationRecord {
                iteration,
                duration_ms: iteration_started.elapsed().as_millis() as u64,
                files_changed: changes.len(),
                had_signal: signal.is_some(),
            });

            // Budget check happens once the iteration's work is accounted.
            if budget.is_exceeded() {
                self.block_with_reason(format!(
                    "token budget exceeded ({} tokens consumed)",
                    budget.describe()
                ));
                outcome.termination = TerminationReason::BudgetExceeded;
                break;
            }

            match signal {
                Some(CompletionSignal::Blocked(reason)) => {
                    info!(reason = %reason, "agent reported the task as blocked");
                    self.block_with_reason(reason);
                    outcome.termination = TerminationReason::Blocked;
                    break;
                }
                Some(CompletionSignal::Complete) => {
                    metrics.start_phase(phases::VALIDATION);
                    let validation = pre.validator.pre_commit().await;
                    metrics.end_phase(phases::VALIDATION);
                    match validation {
                        Ok(summary) if summary.passed => {
                            metrics.record_validation(true, None);
                            if self.config.auto_commit {
                                self.commit_changes(pre, metrics).await;
                            }
                            self.state.status = ExecutorStatus::Completed;
                            outcome.termination = TerminationReason::Completed;
                            break;
                        }
                        Ok(summary) => {
                            // Completion is demoted to pending; the failure
                            // output feeds the next prompt verbatim.
                            let err = summary.error.unwrap_or_else(|| {
                                AidfError::validation(
                                    crate::domain::error::ValidationCode::PreCommit,
                                    "<unknown>",
                                    None,
                                    "",
                                )
                            });
                            if let AidfError::Validation { output, .. } = &err {
                                metrics.record_validation(false, Some(output.clone()));
                            }
                            warn!(error = %err, "pre-commit validation failed; feeding back");
                            self.state.consecutive_failures += 1;
                            self.state.last_error = Some(err.clone());
                            pending_validation = Some(err);
                            continue;
                        }
                        Err(err) => {
                            metrics.record_validation(false, None);
                            metrics.record_error(&err);
                            warn!(error = %err, "validation run failed");
                            self.state.consecutive_failures += 1;
                            self.state.last_error = Some(err);
                            continue;
                        }
                    }
                }
                None => {
                    if self.config.auto_commit && !changes.is_empty() {
                        self.commit_changes(pre, metrics).await;
                    }
                }
            }

            // A clean iteration resets the failure streak.
            self.state.consecutive_failures = 0;

            if self.config.rate_limit.cooldown_ms > 0 && self.state.iteration < max_iterations {
                let base = self.config.rate_limit.cooldown_ms;
                let jitter = rand::rng().random_range(0..=base / 5);
                sleep(Duration::from_millis(base + jitter)).await;
            }
        }

        outcome
    }

    /// Iteration ≥ 2 with session continuation: a short prompt instead of
    /// the full bundle.
    fn build_prompt(
        &self,
        pre: &PreFlightResult,
        iteration: u32,
        pending_validation: Option<&AidfError>,
    ) -> String {
        let continuation = iteration > 1
            && self.config.execution.session_continuation
            && pre.provider.supports_session_continuation()
            && self.state.conversation_state.is_some();

        let mut prompt = if continuation {
            format!(
                "Continue the task \"{}\". Pick up where you left off.\n",
                pre.context.task.title
            )
        } else {
            pre.context.render_prompt()
        };

        if let Some(AidfError::Validation { command, output, .. }) = pending_validation {
            prompt.push_str(&format!(
                "\nThe validation command `{command}` failed with this output; fix the problems \
                 before signalling completion again:\n\n{output}\n"
            ));
        }
        prompt
    }

    fn continuation_state(&self, pre: &PreFlightResult) -> Option<String> {
        if self.config.execution.session_continuation
            && pre.provider.supports_session_continuation()
        {
            self.state.conversation_state.clone()
        } else {
            None
        }
    }

    /// Map a failed provider call onto the loop's recovery policy.
    async fn dispatch_provider_failure(&mut self, err: &AidfError) -> IterationFlow {
        self.state.last_error = Some(err.clone());
        match (err.category(), err) {
            (ErrorCategory::Provider, AidfError::Provider { code, .. }) => match code {
                ProviderCode::NotAvailable => {
                    error!(error = %err, "provider unavailable; aborting");
                    self.state.status = ExecutorStatus::Failed;
                    IterationFlow::Exit(TerminationReason::MaxFailures)
                }
                ProviderCode::RateLimit => {
                    // Rate limits wait but never count against the task.
                    let cooldown = self
                        .config
                        .rate_limit
                        .cooldown_ms
                        .max(self.config.rate_limit.base_delay_ms);
                    warn!(cooldown_ms = cooldown, "rate limited; cooling down");
                    sleep(Duration::from_millis(cooldown)).await;
                    IterationFlow::Continue
                }
                _ if err.is_retryable() => {
                    self.state.consecutive_failures += 1;
                    IterationFlow::Continue
                }
                _ => {
                    self.state.status = ExecutorStatus::Failed;
                    IterationFlow::Exit(TerminationReason::MaxFailures)
                }
            },
            (ErrorCategory::Timeout, _) => {
                warn!(error = %err, "iteration timed out");
                self.state.consecutive_failures += 1;
                IterationFlow::Continue
            }
            (ErrorCategory::Permission | ErrorCategory::Config, _) => {
                error!(error = %err, "non-recoverable failure; aborting");
                self.state.status = ExecutorStatus::Failed;
                IterationFlow::Exit(TerminationReason::MaxFailures)
            }
            (ErrorCategory::Git, AidfError::Git { code: GitCode::RevertFailed, .. }) => {
                error!(error = %err, "revert failed; working tree is suspect, aborting");
                self.state.status = ExecutorStatus::Failed;
                IterationFlow::Exit(TerminationReason::MaxFailures)
            }
            _ if err.is_retryable() => {
                self.state.consecutive_failures += 1;
                IterationFlow::Continue
            }
            _ => {
                self.state.status = ExecutorStatus::Failed;
                IterationFlow::Exit(TerminationReason::MaxFailures)
            }
        }
    }

    /// Undo the listed paths via git checkout. Returns false (and aborts the
    /// run) when the revert itself fails.
    async fn revert_changes(&mut self, paths: &[String], metrics: &mut MetricsCollector) -> bool {
        if paths.is_empty() {
            return true;
        }
        metrics.start_phase(phases::GIT_OPERATIONS);
        let result = self.deps.git.revert_paths(paths).await;
        metrics.end_phase(phases::GIT_OPERATIONS);
        match result {
            Ok(()) => {
                info!(count = paths.len(), "reverted out-of-scope changes");
                true
            }
            Err(err) => {
                error!(error = %err, "revert failed");
                metrics.record_error(&err);
                self.state.status = ExecutorStatus::Failed;
                self.state.last_error = Some(err);
                false
            }
        }
    }

    /// Best-effort cleanup when the scheduler cancels this task.
    async fn revert_uncommitted(&mut self) {
        let Ok(dirty) = self.deps.git.changed_files().await else {
            return;
        };
        let ours: Vec<String> = dirty
            .iter()
            .map(|c: &FileChange| c.path.clone())
            .filter(|p| self.state.files_modified.contains(p))
            .collect();
        if !ours.is_empty() {
            if let Err(err) = self.deps.git.revert_paths(&ours).await {
                warn!(error = %err, "could not revert changes after cancellation");
            }
        }
    }

    /// Stage the task's files and commit. One retry; persistent failure is a
    /// warning, not an abort.
    async fn commit_changes(&mut self, pre: &PreFlightResult, metrics: &mut MetricsCollector) {
        let paths: Vec<String> = self.state.files_modified.iter().cloned().collect();
        if paths.is_empty() {
            return;
        }
        let message = format!("{}: {}", self.config.commit_prefix, pre.context.task.title);

        metrics.start_phase(phases::GIT_OPERATIONS);
        let mut result = self.try_commit(&paths, &message).await;
        if result.is_err() {
            debug!("commit failed once; retrying");
            result = self.try_commit(&paths, &message).await;
        }
        metrics.end_phase(phases::GIT_OPERATIONS);

        if let Err(err) = result {
            warn!(error = %err, "auto-commit failed twice; continuing without commit");
            metrics.record_error(&err);
        }
    }

    async fn try_commit(&self, paths: &[String], message: &str) -> crate::domain::error::AidfResult<()> {
        self.deps.git.stage(paths).await?;
        self.deps.git.commit(message).await
    }

    fn block_on_failures(&mut self) {
        // Validation failures carry the command output; the breadcrumb
        // preserves it so a resume can pick up with full context.
        let reason = match self.state.last_error.as_ref() {
            Some(AidfError::Validation { command, output, .. }) => {
                let snippet: String = output.chars().take(500).collect();
                format!("validation `{command}` kept failing: {snippet}")
            }
            Some(err) => err.to_string(),
            None => "repeated failures".to_string(),
        };
        self.block_with_reason(format!(
            "{} consecutive failures: {reason}",
            self.state.consecutive_failures
        ));
    }

    fn block_with_reason(&mut self, reason: String) {
        self.state.status = ExecutorStatus::Blocked;
        self.state.blocked_status = Some(crate::domain::models::execution::BlockedStatus {
            iteration: self.state.iteration,
            files_modified: self.state.files_modified.iter().cloned().collect(),
            reason,
        });
    }
}
