//! Wave-based parallel execution of a plan.
//!
//! Tasks are layered into waves by the dependency graph, admitted under a
//! concurrency semaphore, and watched by a shared path-claim index. A task
//! that loses a claim collision is cancelled, its work reverted, and re-run
//! serialized after the wave's winners finish. Wave N+1 never starts before
//! wave N completes.

pub mod claims;
pub mod graph;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::error::{AidfError, AidfResult, ConfigCode};
use crate::domain::models::execution::{ExecutorResult, ExecutorStatus};
use crate::domain::models::plan::Plan;
use crate::domain::models::task::TaskFileState;
use crate::services::context_loader::ContextLoader;
use crate::services::executor::{Executor, ExecutorDeps, ExecutorOptions};
use crate::services::validator::Validator;

use claims::PathClaimIndex;
use graph::{schedule, ScheduledGraph, TaskNode};

/// Builds a fresh collaborator bundle per task run.
pub type DepsFactory = Arc<dyn Fn() -> ExecutorDeps + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ParallelOptions {
    pub concurrency: usize,
    pub continue_on_error: bool,
    pub dry_run: bool,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            continue_on_error: false,
            dry_run: false,
        }
    }
}

/// Post-wave verification outcome.
#[derive(Debug, Clone, Default)]
pub struct WaveVerificationResult {
    pub wave: u32,
    pub missing_files: Vec<String>,
    pub validation_errors: Vec<String>,
    pub missing_summaries: Vec<String>,
}

impl WaveVerificationResult {
    pub fn passed(&self) -> bool {
        self.missing_files.is_empty()
            && self.validation_errors.is_empty()
            && self.missing_summaries.is_empty()
    }
}

/// One task's final outcome, by plan path.
#[derive(Debug)]
pub struct TaskOutcome {
    pub path: String,
    pub result: ExecutorResult,
}

/// Aggregate result of one plan run.
#[derive(Debug, Default)]
pub struct ParallelExecutionResult {
    pub success: bool,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub blocked: Vec<String>,
    pub skipped: Vec<String>,
    pub total_iterations: u32,
    pub total_files_modified: usize,
    pub file_conflicts: Vec<String>,
    pub per_task: Vec<TaskOutcome>,
    pub wave_verifications: Vec<WaveVerificationResult>,
}

pub struct ParallelExecutor {
    config: crate::domain::models::config::Config,
    options: ParallelOptions,
    project_root: PathBuf,
    deps_factory: DepsFactory,
}

impl ParallelExecutor {
    pub fn new(
        config: crate::domain::models::config::Config,
        options: ParallelOptions,
        project_root: PathBuf,
        deps_factory: DepsFactory,
    ) -> Self {
        Self {
            config,
            options,
            project_root,
            deps_factory,
        }
    }

    /// Run every unchecked entry of the plan, wave by wave.
    pub async fn run(&self, plan_path: &Path) -> AidfResult<ParallelExecutionResult> {
        let loader = ContextLoader::new(&self.project_root)?;
        let plan = loader.load_plan(plan_path)?;

        let mut result = ParallelExecutionResult::default();
        for entry in plan.entries.iter().filter(|e| e.completed) {
            result.skipped.push(entry.task_path.clone());
        }

        let nodes = self.build_nodes(&loader, &plan)?;
        if nodes.is_empty() {
            info!("plan has no remaining tasks");
            result.success = true;
            return Ok(result);
        }
        self.check_external_dependencies(&loader, &nodes)?;
        let graph = schedule(nodes)?;

        info!(
            tasks = graph.nodes.len(),
            waves = graph.wave_count(),
            concurrency = self.options.concurrency,
            "plan scheduled"
        );

        let claims = Arc::new(PathClaimIndex::new());
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let cancel = CancellationToken::new();
        let mut summaries: Vec<String> = Vec::new();
        let mut halted = false;

        for wave in 1..=graph.wave_count() {
            let wave_tasks = graph.tasks_in_wave(wave);
            if wave_tasks.is_empty() {
                continue;
            }
            if halted {
                for &idx in &wave_tasks {
                    result.skipped.push(graph.nodes[idx].path.clone());
                }
                continue;
            }

            info!(wave, tasks = wave_tasks.len(), "wave started");
            let mut outcomes = self
                .run_wave(&graph, &wave_tasks, &claims, &semaphore, &cancel, &summaries)
                .await;

            // Tasks displaced by a claim collision re-run serialized, after
            // every winner in the wave has finished.
            let retry: Vec<usize> = outcomes
                .iter()
                .filter(|(_, r)| r.conflict.is_some())
                .map(|(idx, r)| {
                    let conflict = r.conflict.as_ref().expect("filtered on conflict");
                    result.file_conflicts.push(conflict.path.clone());
                    *idx
                })
                .collect();
            outcomes.retain(|(_, r)| r.conflict.is_none());
            for idx in retry {
                let node = &graph.nodes[idx];
                info!(task = %node.spec.id, "re-running conflicted task serialized");
                let outcome = self
                    .run_single(node, &claims, &semaphore, &cancel, &summaries)
                    .await;
                claims.release_task(&node.spec.id);
                outcomes.push((idx, outcome));
            }

            let verification = self.verify_wave(wave, &graph, &outcomes).await;
            let wave_failed = outcomes.iter().any(|(_, r)| {
                matches!(r.status, ExecutorStatus::Failed | ExecutorStatus::Blocked)
            }) || !verification.passed();
            result.wave_verifications.push(verification);

            let mut completed_paths = Vec::new();
            for (idx, run) in outcomes {
                let node = &graph.nodes[idx];
                result.total_iterations += run.iteration;
                match run.status {
                    ExecutorStatus::Completed => {
                        result.completed.push(node.path.clone());
                        completed_paths.push(node.path.clone());
                        if let Some(summary) = &run.summary {
                            summaries.push(summary.to_markdown());
                        }
                    }
                    ExecutorStatus::Blocked => result.blocked.push(node.path.clone()),
                    _ => result.failed.push(node.path.clone()),
                }
                result.per_task.push(TaskOutcome {
                    path: node.path.clone(),
                    result: run,
                });
            }

            if !self.options.dry_run && !completed_paths.is_empty() {
                self.update_plan_file(plan_path, &completed_paths, &loader)?;
            }

            if wave_failed && !self.options.continue_on_error {
                warn!(wave, "wave failed; halting remaining waves");
                cancel.cancel();
                halted = true;
            }
            info!(wave, "wave finished");
        }

        let files: BTreeSet<&String> = result
            .per_task
            .iter()
            .flat_map(|t| t.result.files_modified.iter())
            .collect();
        result.total_files_modified = files.len();
        result.success =
            !halted && result.failed.is_empty() && result.blocked.is_empty();
        Ok(result)
    }

    fn build_nodes(&self, loader: &ContextLoader, plan: &Plan) -> AidfResult<Vec<TaskNode>> {
        let mut nodes = Vec::new();
        for entry in plan.remaining() {
            let spec = loader.load_task(Path::new(&entry.task_path))?;
            let mut depends: Vec<String> = spec.depends_on().to_vec();
            for dep in &entry.depends {
                if !depends.contains(dep) {
                    depends.push(dep.clone());
                }
            }
            nodes.push(TaskNode {
                path: entry.task_path.clone(),
                explicit_wave: entry.wave.or(spec.frontmatter.wave),
                depends,
                spec,
            });
        }
        Ok(nodes)
    }

    /// Dependencies on tasks outside the plan must already be completed.
    fn check_external_dependencies(
        &self,
        loader: &ContextLoader,
        nodes: &[TaskNode],
    ) -> AidfResult<()> {
        let in_plan: BTreeSet<&str> = nodes.iter().map(|n| n.spec.id.as_str()).collect();
        let index = loader.load_task_index()?;
        for node in nodes {
            for dep in &node.depends {
                if in_plan.contains(dep.as_str()) {
                    continue;
                }
                match index.get(dep) {
                    Some(entry) if entry.state == TaskFileState::Completed => {}
                    Some(_) => {
                        return Err(AidfError::config(
                            ConfigCode::Invalid,
                            format!(
                                "task {} depends on {dep} which is not completed",
                                node.spec.id
                            ),
                        ));
                    }
                    None => {
                        return Err(AidfError::config(
                            ConfigCode::Invalid,
                            format!("task {} depends on unknown task {dep}", node.spec.id),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    async fn run_wave(
        &self,
        graph: &ScheduledGraph,
        wave_tasks: &[usize],
        claims: &Arc<PathClaimIndex>,
        semaphore: &Arc<Semaphore>,
        cancel: &CancellationToken,
        summaries: &[String],
    ) -> Vec<(usize, ExecutorResult)> {
        let mut handles = Vec::with_capacity(wave_tasks.len());
        for &idx in wave_tasks {
            let node = &graph.nodes[idx];
            let mut executor = self.make_executor(node, claims, cancel, summaries);
            let semaphore = Arc::clone(semaphore);
            let task_id = node.spec.id.clone();
            let claims = Arc::clone(claims);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore closed while scheduling");
                let run = executor.run().await;
                // A conflicted task keeps nothing; winners keep their claims
                // only until they finish.
                if run.conflict.is_none() {
                    claims.release_task(&task_id);
                }
                (idx, run)
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_err) => {
                    warn!(error = %join_err, "task worker panicked");
                }
            }
        }
        outcomes
    }

    async fn run_single(
        &self,
        node: &TaskNode,
        claims: &Arc<PathClaimIndex>,
        semaphore: &Arc<Semaphore>,
        cancel: &CancellationToken,
        summaries: &[String],
    ) -> ExecutorResult {
        let _permit = semaphore.acquire().await.expect("semaphore closed");
        self.make_executor(node, claims, cancel, summaries).run().await
    }

    fn make_executor(
        &self,
        node: &TaskNode,
        claims: &Arc<PathClaimIndex>,
        cancel: &CancellationToken,
        summaries: &[String],
    ) -> Executor {
        let mut deps = (self.deps_factory)();
        deps.claims = Some(Arc::clone(claims));
        deps.cancel = cancel.child_token();
        Executor::new(
            self.config.clone(),
            ExecutorOptions {
                resume: false,
                dry_run: self.options.dry_run,
                previous_summaries: summaries.to_vec(),
            },
            deps,
            self.project_root.clone(),
            PathBuf::from(&node.path),
        )
    }

    /// Inter-wave verification: declared `creates` exist, each completed
    /// task produced a summary, and the configured validation commands pass
    /// on the aggregate change.
    async fn verify_wave(
        &self,
        wave: u32,
        graph: &ScheduledGraph,
        outcomes: &[(usize, ExecutorResult)],
    ) -> WaveVerificationResult {
        let mut verification = WaveVerificationResult {
            wave,
            ..Default::default()
        };
        if self.options.dry_run {
            return verification;
        }

        for (idx, run) in outcomes {
            if run.status != ExecutorStatus::Completed {
                continue;
            }
            let node = &graph.nodes[*idx];
            for created in &node.spec.creates {
                if !self.project_root.join(created).exists() {
                    verification.missing_files.push(created.clone());
                }
            }
            if run.summary.is_none() {
                verification.missing_summaries.push(node.path.clone());
            }
        }

        let any_completed = outcomes
            .iter()
            .any(|(_, r)| r.status == ExecutorStatus::Completed);
        if any_completed && !self.config.validation.pre_commit.is_empty() {
            let validator =
                Validator::new(self.config.validation.clone(), self.project_root.clone());
            match validator.pre_commit().await {
                Ok(summary) if !summary.passed => {
                    if let Some(err) = summary.error {
                        verification.validation_errors.push(err.to_string());
                    }
                }
                Err(err) => verification.validation_errors.push(err.to_string()),
                Ok(_) => {}
            }
        }

        if !verification.passed() {
            warn!(
                wave,
                missing_files = verification.missing_files.len(),
                validation_errors = verification.validation_errors.len(),
                "wave verification failed"
            );
        }
        verification
    }

    /// Line-scoped checkbox rewrite; re-invoking the plan resumes from
    /// whatever is still unchecked.
    fn update_plan_file(
        &self,
        plan_path: &Path,
        completed: &[String],
        loader: &ContextLoader,
    ) -> AidfResult<()> {
        let resolved = if plan_path.is_absolute() {
            plan_path.to_path_buf()
        } else {
            let from_root = self.project_root.join(plan_path);
            if from_root.exists() {
                from_root
            } else {
                loader.ai_root().join(plan_path)
            }
        };
        let content = std::fs::read_to_string(&resolved).map_err(|e| {
            AidfError::config(
                ConfigCode::Missing,
                format!("plan {} could not be re-read: {e}", resolved.display()),
            )
        })?;
        let updated = Plan::mark_completed(&content, completed);
        std::fs::write(&resolved, updated).map_err(|e| {
            AidfError::config(
                ConfigCode::Invalid,
                format!("plan {} could not be updated: {e}", resolved.display()),
            )
        })?;
        Ok(())
    }
}
