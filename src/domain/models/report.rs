//! Execution report and task summary records.
//!
//! The report is a pure data record; writing it to disk and any webhook
//! delivery belong to outer collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::execution::TokenUsage;

/// Token totals section of the report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensReport {
    pub input: u64,
    pub output: u64,
    pub estimated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<u64>,
}

impl From<TokenUsage> for TokensReport {
    fn from(usage: TokenUsage) -> Self {
        Self {
            input: usage.input_tokens,
            output: usage.output_tokens,
            estimated: usage.estimated,
            cache_read: usage.cache_read,
            cache_write: usage.cache_write,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostReport {
    pub estimated_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingReport {
    pub total_ms: u64,
    /// Phase name → accumulated milliseconds.
    pub phases: std::collections::BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesReport {
    pub modified: Vec<String>,
    pub created: Vec<String>,
    pub reverted: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub runs: u32,
    pub failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeReport {
    pub violations: u32,
    pub reverted_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentReport {
    pub os: String,
    pub ci: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_provider: Option<String>,
}

impl EnvironmentReport {
    /// CI flags are read only to enrich the report, never to drive behavior.
    pub fn detect() -> Self {
        let providers = [
            ("GITHUB_ACTIONS", "github-actions"),
            ("GITLAB_CI", "gitlab-ci"),
            ("CIRCLECI", "circleci"),
            ("JENKINS_URL", "jenkins"),
        ];
        let ci_provider = providers
            .iter()
            .find(|(var, _)| std::env::var(var).is_ok_and(|v| !v.is_empty()))
            .map(|(_, name)| (*name).to_string());
        let ci = ci_provider.is_some() || std::env::var("CI").is_ok_and(|v| !v.is_empty());
        Self {
            os: std::env::consts::OS.to_string(),
            ci,
            ci_provider,
        }
    }
}

/// One run's execution report. Serialized key set is the external contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub task_path: String,
    pub task_goal: String,
    pub task_type: Option<String>,
    pub role_name: Option<String>,
    pub provider: String,
    pub cwd: String,
    pub aidf_version: String,
    pub status: String,
    pub iterations: u32,
    pub max_iterations: u32,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    pub tokens: TokensReport,
    pub cost: CostReport,
    pub timing: TimingReport,
    pub files: FilesReport,
    pub validation: ValidationReport,
    pub scope: ScopeReport,
    pub environment: EnvironmentReport,
}

/// Compact post-hoc record of one task's outcome, injected into later
/// waves' contexts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct TaskSummary {
    pub task_path: String,
    pub task_name: String,
    pub status: String,
    pub files_modified: Vec<String>,
    pub files_created: Vec<String>,
    pub decisions: Vec<String>,
    pub key_changes: Vec<String>,
    pub warnings: Vec<String>,
    pub iterations: u32,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskSummary {
    /// Render as markdown for context injection, capped at 30 lines.
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            format!("## {} — {}", self.task_name, self.status),
            format!("Iterations: {}", self.iterations),
        ];
        push_list(&mut lines, "Files modified", &self.files_modified);
        push_list(&mut lines, "Files created", &self.files_created);
        push_list(&mut lines, "Decisions", &self.decisions);
        push_list(&mut lines, "Key changes", &self.key_changes);
        push_list(&mut lines, "Warnings", &self.warnings);
        if lines.len() > 30 {
            lines.truncate(29);
            lines.push("- …".to_string());
        }
        lines.join("\n")
    }
}

fn push_list(lines: &mut Vec<String>, label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    lines.push(format!("{label}:"));
    for item in items {
        lines.push(format!("- {item}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_key_contract() {
        let report = ExecutionReport {
            run_id: "abc".into(),
            timestamp: Utc::now(),
            task_path: "tasks/pending/1.md".into(),
            task_goal: "do it".into(),
            task_type: Some("feature".into()),
            role_name: None,
            provider: "subprocess-claude".into(),
            cwd: "/tmp/project".into(),
            aidf_version: "0.1.0".into(),
            status: "completed".into(),
            iterations: 1,
            max_iterations: 10,
            consecutive_failures: 0,
            error: None,
            blocked_reason: None,
            tokens: TokensReport::default(),
            cost: CostReport::default(),
            timing: TimingReport::default(),
            files: FilesReport::default(),
            validation: ValidationReport::default(),
            scope: ScopeReport::default(),
            environment: EnvironmentReport::default(),
        };
        let value = serde_json::to_value(&report).unwrap();
        for key in [
            "runId",
            "timestamp",
            "taskPath",
            "taskGoal",
            "taskType",
            "provider",
            "cwd",
            "aidfVersion",
            "status",
            "iterations",
            "maxIterations",
            "consecutiveFailures",
            "tokens",
            "cost",
            "timing",
            "files",
            "validation",
            "scope",
            "environment",
        ] {
            assert!(value.get(key).is_some(), "missing report key {key}");
        }
    }

    #[test]
    fn test_summary_markdown_capped() {
        let summary = TaskSummary {
            task_name: "big".into(),
            status: "completed".into(),
            files_modified: (0..40).map(|i| format!("src/file{i}.rs")).collect(),
            ..Default::default()
        };
        let md = summary.to_markdown();
        assert!(md.lines().count() <= 30);
        assert!(md.ends_with("- …"));
    }

    #[test]
    fn test_summary_markdown_sections() {
        let summary = TaskSummary {
            task_name: "cache".into(),
            status: "completed".into(),
            iterations: 2,
            files_modified: vec!["src/cache.rs".into()],
            decisions: vec!["chose LRU over LFU".into()],
            ..Default::default()
        };
        let md = summary.to_markdown();
        assert!(md.starts_with("## cache — completed"));
        assert!(md.contains("Decisions:\n- chose LRU over LFU"));
    }
}
