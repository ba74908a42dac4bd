//! Postflight: status section, task-file move, push, summary, report.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, warn};

use crate::domain::models::execution::{
    ExecutorResult, ExecutorStatus, TerminationReason,
};
use crate::domain::models::report::TaskSummary;
use crate::domain::models::task::TaskFileState;
use crate::domain::ports::NotificationEvent;
use crate::services::metrics::{estimate_cost, MetricsCollector};
use crate::services::summary::build_summary;

use super::preflight::BREADCRUMB_PREFIX;
use super::{Executor, LoopOutcome, PreFlightResult};

impl Executor {
    pub(super) async fn postflight(
        &mut self,
        pre: PreFlightResult,
        outcome: LoopOutcome,
        metrics: MetricsCollector,
        started: Instant,
    ) -> ExecutorResult {
        self.state.completed_at = Some(chrono::Utc::now());
        let status = self.state.status;

        // Dry runs, pauses, and scheduler cancellations leave the task file
        // where it is; there is no outcome to persist.
        let transient = matches!(
            outcome.termination,
            TerminationReason::DryRun | TerminationReason::Cancelled
        ) || status == ExecutorStatus::Paused;

        let mut summary = None;
        if !transient {
            self.write_status_and_move(&pre).await;

            if self.config.auto_push && status == ExecutorStatus::Completed {
                self.push_best_effort(&pre).await;
            }

            let built = build_summary(
                &pre.context.task,
                &self.task_path.display().to_string(),
                &self.state,
                status,
                &outcome.accumulated_output,
                outcome.warnings.clone(),
            );
            self.write_summary(&built);
            self.log_run_summary(&built, status);
            summary = Some(built);

            if matches!(status, ExecutorStatus::Failed | ExecutorStatus::Blocked) {
                let err = self.state.last_error.as_ref();
                self.deps
                    .notifier
                    .notify(&NotificationEvent {
                        task_id: pre.context.task.id.clone(),
                        task_title: pre.context.task.title.clone(),
                        status,
                        error_category: err.map(|e| e.category().as_str().to_string()),
                        error_code: err.map(|e| e.code_str().to_string()),
                        message: self
                            .state
                            .blocked_status
                            .as_ref()
                            .map_or_else(
                                || format!("task ended {}", status.as_str()),
                                |b| b.reason.clone(),
                            ),
                    })
                    .await;
            }
        }

        let report = (!transient).then(|| {
            metrics.to_report(
                &pre.context.task.goal,
                pre.context.task.frontmatter.task_type.clone(),
                pre.context.role.as_ref().map(|r| r.name.clone()),
                status.as_str(),
                self.state.iteration,
                self.config.execution.max_iterations,
                self.state.consecutive_failures,
                self.state.files_modified.iter().cloned().collect(),
                self.state.blocked_status.as_ref().map(|b| b.reason.clone()),
                &self.config.cost_overrides,
            )
        });

        ExecutorResult {
            status,
            iteration: self.state.iteration,
            files_modified: self.state.files_modified.iter().cloned().collect(),
            duration_ms: started.elapsed().as_millis() as u64,
            token_usage: self.state.token_usage,
            termination: outcome.termination,
            error: self.state.last_error.clone(),
            conflict: outcome.conflict,
            summary,
            report,
        }
    }

    /// Append the `## Status` section and move the file into its terminal
    /// directory, staging both sides of the move. Both are best-effort: a
    /// filesystem hiccup here must not turn a completed task into a failure.
    async fn write_status_and_move(&mut self, pre: &PreFlightResult) {
        let Some(current) = self.resolve_task_path() else {
            warn!(task = %self.task_path.display(), "task file disappeared before postflight");
            return;
        };

        let status_label = match self.state.status {
            ExecutorStatus::Completed => "COMPLETED",
            ExecutorStatus::Blocked => "BLOCKED",
            _ => "FAILED",
        };
        let target_state = match self.state.status {
            ExecutorStatus::Completed => TaskFileState::Completed,
            ExecutorStatus::Blocked => TaskFileState::Blocked,
            _ => TaskFileState::Failed,
        };

        let mut content = match std::fs::read_to_string(&current) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "could not read task file for status update");
                pre.context.task.raw.clone()
            }
        };
        content = strip_status_section(&content);
        content.push_str(&self.render_status_section(status_label));

        if let Err(e) = std::fs::write(&current, &content) {
            warn!(error = %e, "could not write task status section");
        }

        let target_dir = self
            .project_root
            .join(".ai")
            .join("tasks")
            .join(target_state.dir_name());
        let target = target_dir.join(current.file_name().unwrap_or_default());
        if target == current {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(&target_dir) {
            warn!(error = %e, "could not create task state directory");
            return;
        }
        match std::fs::rename(&current, &target) {
            Ok(()) => {
                info!(from = %current.display(), to = %target.display(), "task file moved");
                // Stage the deletion and the addition so the move travels
                // with the next commit.
                let paths: Vec<String> = [&current, &target]
                    .iter()
                    .filter_map(|p| {
                        p.strip_prefix(&self.project_root)
                            .ok()
                            .map(|rel| rel.display().to_string())
                    })
                    .collect();
                if let Err(e) = self.deps.git.stage(&paths).await {
                    warn!(error = %e, "could not stage task file move");
                }
            }
            Err(e) => warn!(error = %e, "could not move task file"),
        }
    }

    fn render_status_section(&self, label: &str) -> String {
        let usage = self.state.token_usage;
        let cost = self
            .config
            .provider
            .model
            .as_deref()
            .and_then(|m| estimate_cost(m, &usage, &self.config.cost_overrides))
            .unwrap_or(0.0);
        let files: Vec<String> = self.state.files_modified.iter().cloned().collect();
        let duration_ms = self
            .state
            .started_at
            .zip(self.state.completed_at)
            .map_or(0, |(s, e)| (e - s).num_milliseconds().max(0));

        let mut section = format!(
            "\n## Status: {label}\n\
             - Iterations: {}\n\
             - Files: {}\n\
             - Duration: {duration_ms}ms\n\
             - TokenUsage: {{ input: {}, output: {}, estimatedCost: {cost:.6} }}\n",
            self.state.iteration,
            files.join(", "),
            usage.input_tokens,
            usage.output_tokens,
        );
        if let Some(err) = &self.state.last_error {
            section.push_str(&format!("- Error: [{}] {err}\n", err.code_str()));
        }
        if let Some(blocked) = &self.state.blocked_status {
            if let Ok(json) = serde_json::to_string(blocked) {
                section.push_str(&format!("{BREADCRUMB_PREFIX}{json}\n"));
            }
        }
        section
    }

    async fn push_best_effort(&self, pre: &PreFlightResult) {
        if !self.config.validation.pre_push.is_empty() {
            match pre.validator.pre_push().await {
                Ok(summary) if !summary.passed => {
                    warn!("pre-push validation failed; skipping push");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "pre-push validation errored; skipping push");
                    return;
                }
                Ok(_) => {}
            }
        }
        match self.deps.git.push().await {
            Ok(()) => info!("pushed current branch"),
            Err(err) => warn!(error = %err, "push failed (best-effort)"),
        }
    }

    fn write_summary(&self, summary: &TaskSummary) {
        let dir = self.project_root.join(".ai").join("summaries");
        if std::fs::create_dir_all(&dir).is_err() {
            return;
        }
        let file = dir.join(format!(
            "{}.summary.md",
            summary
                .task_path
                .rsplit('/')
                .next()
                .unwrap_or("task")
                .trim_end_matches(".md")
        ));
        if let Err(e) = std::fs::write(&file, summary.to_markdown()) {
            warn!(error = %e, "could not write task summary");
        }
    }

    fn log_run_summary(&self, summary: &TaskSummary, status: ExecutorStatus) {
        info!(
            status = status.as_str(),
            iterations = self.state.iteration,
            files = summary.files_modified.len(),
            input_tokens = self.state.token_usage.input_tokens,
            output_tokens = self.state.token_usage.output_tokens,
            "task run finished"
        );
    }

    fn resolve_task_path(&self) -> Option<PathBuf> {
        if self.task_path.is_absolute() {
            return self.task_path.exists().then(|| self.task_path.clone());
        }
        let from_root = self.project_root.join(&self.task_path);
        if from_root.exists() {
            return Some(from_root);
        }
        let from_ai = self.project_root.join(".ai").join(&self.task_path);
        from_ai.exists().then_some(from_ai)
    }
}

/// Drop any previously written `## Status` section (everything from the
/// heading to the next heading or EOF).
fn strip_status_section(content: &str) -> String {
    let mut out = Vec::new();
    let mut skipping = false;
    for line in content.lines() {
        if line.starts_with("## Status:") {
            skipping = true;
            continue;
        }
        if skipping && line.starts_with("## ") {
            skipping = false;
        }
        if !skipping {
            out.push(line);
        }
    }
    let mut joined = out.join("\n");
    while joined.ends_with("\n\n") {
        joined.pop();
    }
    if !joined.ends_with('\n') {
        joined.push('\n');
    }
    joined
}
