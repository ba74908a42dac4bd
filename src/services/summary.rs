//! Task summary extraction from agent output.
//!
//! Decisions are pulled out with fixed lexical patterns only; when the
//! output doesn't clearly state a decision, the summary stays silent rather
//! than fabricating one.

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

use crate::domain::models::execution::{ExecutorStatus, ExecutorState};
use crate::domain::models::report::TaskSummary;
use crate::domain::models::task::TaskSpec;

const MAX_DECISIONS: usize = 5;
const MAX_KEY_CHANGES: usize = 8;

fn decision_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?m)I decided (?:to )?([^.\n]{5,120})").expect("valid regex"),
            Regex::new(r"(?m)[Cc]hose ([^.\n]{3,60} over [^.\n]{3,60})").expect("valid regex"),
            Regex::new(r"(?m)[Uu]sing ([^.\n]{3,60} because [^.\n]{3,120})").expect("valid regex"),
        ]
    })
}

/// Extract decision statements from accumulated agent output.
pub fn extract_decisions(output: &str) -> Vec<String> {
    let mut decisions = Vec::new();
    for pattern in decision_patterns() {
        for caps in pattern.captures_iter(output) {
            if let Some(m) = caps.get(1) {
                let text = m.as_str().trim().trim_end_matches('.').to_string();
                if !decisions.contains(&text) {
                    decisions.push(text);
                }
            }
            if decisions.len() >= MAX_DECISIONS {
                return decisions;
            }
        }
    }
    decisions
}

/// Build the post-run summary for injection into later waves.
pub fn build_summary(
    task: &TaskSpec,
    task_path: &str,
    state: &ExecutorState,
    status: ExecutorStatus,
    accumulated_output: &str,
    warnings: Vec<String>,
) -> TaskSummary {
    let files_modified: Vec<String> = state.files_modified.iter().cloned().collect();
    let files_created: Vec<String> = task
        .creates
        .iter()
        .filter(|c| files_modified.iter().any(|f| f == *c))
        .cloned()
        .collect();

    let key_changes = files_modified
        .iter()
        .take(MAX_KEY_CHANGES)
        .map(|f| format!("touched {f}"))
        .collect();

    TaskSummary {
        task_path: task_path.to_string(),
        task_name: task.title.clone(),
        status: status.as_str().to_string(),
        files_modified,
        files_created,
        decisions: extract_decisions(accumulated_output),
        key_changes,
        warnings,
        iterations: state.iteration,
        completed_at: Some(Utc::now()),
    }
}
