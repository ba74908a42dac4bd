//! Passive per-run metrics collection and cost estimation.
//!
//! The collector performs no I/O: phases are timed in memory, events are
//! appended, and `to_report` assembles the pure `ExecutionReport` record.
//! Writing the report anywhere is the caller's business.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::error::AidfError;
use crate::domain::models::config::CostRate;
use crate::domain::models::execution::TokenUsage;
use crate::domain::models::report::{
    CostReport, EnvironmentReport, ExecutionReport, FilesReport, ScopeReport, TimingReport,
    TokensReport, ValidationReport,
};

/// USD pricing per million tokens for one model family.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

/// Built-in rates, matched by model-name substring. Config `cost_overrides`
/// take precedence.
const PRICING_TABLE: &[(&str, ModelPricing)] = &[
    ("opus", ModelPricing { input: 15.0, output: 75.0 }),
    ("sonnet", ModelPricing { input: 3.0, output: 15.0 }),
    ("haiku", ModelPricing { input: 0.80, output: 4.0 }),
    ("gpt-4o-mini", ModelPricing { input: 0.15, output: 0.60 }),
    ("gpt-4o", ModelPricing { input: 2.50, output: 10.0 }),
    ("gpt-4", ModelPricing { input: 30.0, output: 60.0 }),
];

/// Resolve pricing for a model, config overrides first.
pub fn model_pricing(model: &str, overrides: &[CostRate]) -> Option<ModelPricing> {
    let model_lower = model.to_lowercase();
    if let Some(rate) = overrides
        .iter()
        .find(|r| model_lower.contains(&r.model_substring.to_lowercase()))
    {
        return Some(ModelPricing {
            input: rate.input_per_mtok,
            output: rate.output_per_mtok,
        });
    }
    PRICING_TABLE
        .iter()
        .find(|(name, _)| model_lower.contains(name))
        .map(|(_, pricing)| *pricing)
}

/// Estimated USD cost for a usage total; `None` when the model is unknown.
pub fn estimate_cost(model: &str, usage: &TokenUsage, overrides: &[CostRate]) -> Option<f64> {
    let pricing = model_pricing(model, overrides)?;
    Some(
        (usage.input_tokens as f64 * pricing.input + usage.output_tokens as f64 * pricing.output)
            / 1_000_000.0,
    )
}

/// Well-known phase names used by the executor.
pub mod phases {
    pub const CONTEXT_LOADING: &str = "contextLoading";
    pub const AI_EXECUTION: &str = "aiExecution";
    pub const SCOPE_CHECKING: &str = "scopeChecking";
    pub const VALIDATION: &str = "validation";
    pub const GIT_OPERATIONS: &str = "gitOperations";
    pub const OTHER: &str = "other";
}

/// Per-iteration data point.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub iteration: u32,
    pub duration_ms: u64,
    pub files_changed: usize,
    pub had_signal: bool,
}

/// Passive metrics collector for one run.
pub struct MetricsCollector {
    run_id: Uuid,
    task_path: String,
    provider: String,
    model: Option<String>,
    cwd: String,
    started: Instant,
    open_phases: BTreeMap<String, Instant>,
    phase_totals: BTreeMap<String, u64>,
    iterations: Vec<IterationRecord>,
    token_usage: TokenUsage,
    validation_runs: u32,
    validation_failures: u32,
    last_validation_failure: Option<String>,
    scope_violations: u32,
    reverted_files: Vec<String>,
    files_created: Vec<String>,
    errors: Vec<serde_json::Value>,
}

impl MetricsCollector {
    pub fn new(
        task_path: impl Into<String>,
        provider: impl Into<String>,
        model: Option<String>,
        cwd: impl Into<String>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task_path: task_path.into(),
            provider: provider.into(),
            model,
            cwd: cwd.into(),
            started: Instant::now(),
            open_phases: BTreeMap::new(),
            phase_totals: BTreeMap::new(),
            iterations: Vec::new(),
            token_usage: TokenUsage::default(),
            validation_runs: 0,
            validation_failures: 0,
            last_validation_failure: None,
            scope_violations: 0,
            reverted_files: Vec::new(),
            files_created: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Short id used in report file names.
    pub fn short_id(&self) -> String {
        self.run_id.simple().to_string()[..8].to_string()
    }

    pub fn start_phase(&mut self, name: &str) {
        self.open_phases.insert(name.to_string(), Instant::now());
    }

    pub fn end_phase(&mut self, name: &str) {
        if let Some(started) = self.open_phases.remove(name) {
            *self.phase_totals.entry(name.to_string()).or_insert(0) +=
                started.elapsed().as_millis() as u64;
        }
    }

    pub fn record_iteration(&mut self, record: IterationRecord) {
        self.iterations.push(record);
    }

    pub fn record_token_usage(&mut self, usage: &TokenUsage) {
        self.token_usage.add(usage);
    }

    pub fn record_validation(&mut self, passed: bool, failure_output: Option<String>) {
        self.validation_runs += 1;
        if !passed {
            self.validation_failures += 1;
            self.last_validation_failure = failure_output;
        }
    }

    pub fn record_scope_violation(&mut self, reverted: &[String]) {
        self.scope_violations += 1;
        self.reverted_files.extend_from_slice(reverted);
    }

    pub fn record_file_created(&mut self, path: impl Into<String>) {
        self.files_created.push(path.into());
    }

    pub fn record_error(&mut self, error: &AidfError) {
        self.errors.push(error.to_json());
    }

    /// Assemble the final report record.
    #[allow(clippy::too_many_arguments)]
    pub fn to_report(
        &self,
        task_goal: &str,
        task_type: Option<String>,
        role_name: Option<String>,
        status: &str,
        iterations: u32,
        max_iterations: u32,
        consecutive_failures: u32,
        files_modified: Vec<String>,
        blocked_reason: Option<String>,
        cost_overrides: &[CostRate],
    ) -> ExecutionReport {
        let estimated_usd = self
            .model
            .as_deref()
            .and_then(|m| estimate_cost(m, &self.token_usage, cost_overrides))
            .unwrap_or(0.0);

        ExecutionReport {
            run_id: self.run_id.to_string(),
            timestamp: Utc::now(),
            task_path: self.task_path.clone(),
            task_goal: task_goal.to_string(),
            task_type,
            role_name,
            provider: self.provider.clone(),
            cwd: self.cwd.clone(),
            aidf_version: env!("CARGO_PKG_VERSION").to_string(),
            status: status.to_string(),
            iterations,
            max_iterations,
            consecutive_failures,
            error: self.errors.last().cloned(),
            blocked_reason,
            tokens: TokensReport::from(self.token_usage),
            cost: CostReport {
                estimated_usd,
                model: self.model.clone(),
            },
            timing: TimingReport {
                total_ms: self.started.elapsed().as_millis() as u64,
                phases: self.phase_totals.clone(),
            },
            files: FilesReport {
                modified: files_modified,
                created: self.files_created.clone(),
                reverted: self.reverted_files.clone(),
            },
            validation: ValidationReport {
                runs: self.validation_runs,
                failures: self.validation_failures,
                last_failure: self.last_validation_failure.clone(),
            },
            scope: ScopeReport {
                violations: self.scope_violations,
                reverted_files: self.reverted_files.clone(),
            },
            environment: EnvironmentReport::detect(),
        }
    }
}
