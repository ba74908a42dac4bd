//! Execution-side data model: provider results, executor state, outcomes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::AidfError;
use crate::domain::models::task::FileChange;

/// Executor lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Blocked,
    Failed,
    NeedsReview,
}

impl ExecutorStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
            Self::NeedsReview => "needs_review",
        }
    }
}

/// Why the execution loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Completed,
    Blocked,
    MaxIterations,
    MaxFailures,
    DryRun,
    BudgetExceeded,
    /// Cancelled by the parallel scheduler (conflict loss or wave halt).
    Cancelled,
}

/// Literal completion signal parsed from agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionSignal {
    Complete,
    Blocked(String),
}

pub const TASK_COMPLETE_TOKEN: &str = "<TASK_COMPLETE>";
pub const TASK_BLOCKED_PREFIX: &str = "<TASK_BLOCKED:";

impl CompletionSignal {
    /// Scan output for `<TASK_COMPLETE>` or `<TASK_BLOCKED: reason>`.
    /// Any other output does not terminate the loop.
    pub fn parse(output: &str) -> Option<Self> {
        if output.contains(TASK_COMPLETE_TOKEN) {
            return Some(Self::Complete);
        }
        let start = output.find(TASK_BLOCKED_PREFIX)?;
        let rest = &output[start + TASK_BLOCKED_PREFIX.len()..];
        let end = rest.find('>')?;
        Some(Self::Blocked(rest[..end].trim().to_string()))
    }
}

/// Running token totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// True when derived from character counts rather than the API.
    pub estimated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<u64>,
}

impl TokenUsage {
    pub fn estimated(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            estimated: true,
            cache_read: None,
            cache_write: None,
        }
    }

    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate another call's usage; the aggregate is estimated if any
    /// contribution was.
    pub fn add(&mut self, other: &Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.estimated |= other.estimated;
        if let Some(r) = other.cache_read {
            *self.cache_read.get_or_insert(0) += r;
        }
        if let Some(w) = other.cache_write {
            *self.cache_write.get_or_insert(0) += w;
        }
    }
}

/// Metrics returned by a conversation-window trim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct WindowMetrics {
    pub total_messages: usize,
    pub preserved_messages: usize,
    pub evicted_messages: usize,
    pub estimated_tokens: usize,
}

/// Successful outcome of one provider call.
///
/// Failures travel as `Err(AidfError)`, so by construction a returned
/// result is `success=true` with populated output, and every failure
/// carries its category and code.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub output: String,
    pub files_changed: Vec<FileChange>,
    pub completion_signal: Option<CompletionSignal>,
    pub token_usage: Option<TokenUsage>,
    pub conversation_metrics: Option<WindowMetrics>,
    /// Opaque provider-kept continuation handle.
    pub conversation_state: Option<String>,
}

/// Resumable breadcrumb written into a blocked task file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BlockedStatus {
    pub iteration: u32,
    pub files_modified: Vec<String>,
    pub reason: String,
}

/// Mutable executor state, owned by one executor for the run's duration.
#[derive(Debug, Clone)]
pub struct ExecutorState {
    pub status: ExecutorStatus,
    pub iteration: u32,
    pub files_modified: BTreeSet<String>,
    pub consecutive_failures: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<AidfError>,
    pub token_usage: TokenUsage,
    pub conversation_state: Option<String>,
    pub blocked_status: Option<BlockedStatus>,
}

impl Default for ExecutorState {
    fn default() -> Self {
        Self {
            status: ExecutorStatus::Idle,
            iteration: 0,
            files_modified: BTreeSet::new(),
            consecutive_failures: 0,
            started_at: None,
            completed_at: None,
            last_error: None,
            token_usage: TokenUsage::default(),
            conversation_state: None,
            blocked_status: None,
        }
    }
}

impl ExecutorState {
    /// Union in the files a scope-cleared iteration changed.
    pub fn record_files(&mut self, changes: &[FileChange]) {
        for change in changes {
            self.files_modified.insert(change.path.clone());
        }
    }

    /// Drop files that scope enforcement reverted.
    pub fn remove_files(&mut self, paths: &[String]) {
        for path in paths {
            self.files_modified.remove(path);
        }
    }
}

/// A runtime path-claim collision with another task in the same wave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimConflict {
    pub path: String,
    /// Task id that holds the claim.
    pub winner: String,
}

/// Final outcome of one task run.
#[derive(Debug, Clone)]
pub struct ExecutorResult {
    pub status: ExecutorStatus,
    pub iteration: u32,
    pub files_modified: Vec<String>,
    pub duration_ms: u64,
    pub token_usage: TokenUsage,
    pub termination: TerminationReason,
    pub error: Option<AidfError>,
    /// Set when the run was cancelled by a claim collision.
    pub conflict: Option<ClaimConflict>,
    /// Compact summary for later waves; absent for dry runs and cancels.
    pub summary: Option<crate::domain::models::report::TaskSummary>,
    pub report: Option<crate::domain::models::report::ExecutionReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::ChangeKind;

    #[test]
    fn test_completion_signal_parse() {
        assert_eq!(
            CompletionSignal::parse("all done\n<TASK_COMPLETE>"),
            Some(CompletionSignal::Complete)
        );
        assert_eq!(
            CompletionSignal::parse("<TASK_BLOCKED: missing API docs>"),
            Some(CompletionSignal::Blocked("missing API docs".into()))
        );
        assert_eq!(CompletionSignal::parse("still working on it"), None);
        // An unterminated blocked marker is not a signal.
        assert_eq!(CompletionSignal::parse("<TASK_BLOCKED: oops"), None);
    }

    #[test]
    fn test_token_usage_add() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            estimated: false,
            cache_read: Some(10),
            cache_write: None,
        });
        total.add(&TokenUsage::estimated(30, 20));
        assert_eq!(total.input_tokens, 130);
        assert_eq!(total.output_tokens, 70);
        assert_eq!(total.total(), 200);
        assert!(total.estimated);
        assert_eq!(total.cache_read, Some(10));
    }

    #[test]
    fn test_state_file_tracking() {
        let mut state = ExecutorState::default();
        state.record_files(&[
            FileChange::new("src/a.rs", ChangeKind::Modified),
            FileChange::new("src/b.rs", ChangeKind::Created),
        ]);
        state.record_files(&[FileChange::new("src/a.rs", ChangeKind::Modified)]);
        assert_eq!(state.files_modified.len(), 2);

        state.remove_files(&["src/b.rs".to_string()]);
        assert_eq!(state.files_modified.len(), 1);
        assert!(state.files_modified.contains("src/a.rs"));
    }
}
