//! Ports: trait contracts for the injected collaborators.
//!
//! The executor never talks to a subprocess, HTTP client, or git binary
//! directly; it goes through these traits so tests can substitute mocks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::error::AidfResult;
use crate::domain::models::execution::{ExecutionResult, ExecutorStatus};
use crate::domain::models::task::FileChange;

/// Streaming output observer; best-effort, no backpressure.
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Retry observer: `(attempt, delay_ms, error_message)`.
pub type RetryCallback = Arc<dyn Fn(u32, u64, &str) + Send + Sync>;

/// Per-call provider options.
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub timeout_ms: u64,
    /// Continuation handle from the previous call, when supported.
    pub conversation_state: Option<String>,
    pub on_output: Option<OutputCallback>,
    pub on_retry: Option<RetryCallback>,
}

impl fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("timeout_ms", &self.timeout_ms)
            .field("conversation_state", &self.conversation_state.is_some())
            .field("on_output", &self.on_output.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Uniform interface over subprocess CLI agents and HTTP tool-calling APIs.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Run one iteration against the backend.
    ///
    /// A returned `ExecutionResult` always represents success with
    /// populated output; every failure is an `AidfError` carrying its
    /// category and code.
    async fn execute(&self, prompt: &str, opts: &ExecuteOptions) -> AidfResult<ExecutionResult>;

    /// Whether the backend can be reached at all (CLI on PATH, key set).
    async fn is_available(&self) -> bool;

    /// Stable identifier for reports (`subprocess-claude`, `http-anthropic`, …).
    fn name(&self) -> &str;

    /// Whether `conversation_state` round-trips through this provider.
    fn supports_session_continuation(&self) -> bool {
        false
    }
}

/// Git operations the executor needs. Paths are relative to the repo root.
#[async_trait]
pub trait GitClient: Send + Sync {
    async fn is_repo(&self) -> bool;

    /// Current dirty set (staged + unstaged + untracked).
    async fn changed_files(&self) -> AidfResult<Vec<FileChange>>;

    async fn stage(&self, paths: &[String]) -> AidfResult<()>;

    async fn commit(&self, message: &str) -> AidfResult<()>;

    /// Push the current branch to its upstream.
    async fn push(&self) -> AidfResult<()>;

    /// Discard working-tree changes to the given paths; untracked files are
    /// deleted.
    async fn revert_paths(&self, paths: &[String]) -> AidfResult<()>;

    async fn current_branch(&self) -> AidfResult<String>;
}

/// Event handed to the notification service when a task ends.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub task_id: String,
    pub task_title: String,
    pub status: ExecutorStatus,
    pub error_category: Option<String>,
    pub error_code: Option<String>,
    pub message: String,
}

/// Notification delivery contract; transports are external.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent);
}

/// Answers ASK_USER scope decisions.
#[async_trait]
pub trait ScopeApprover: Send + Sync {
    /// Returns true to approve the listed files for the rest of the run.
    async fn ask(&self, files: &[String]) -> bool;
}

/// Condenses evicted conversation text into a short summary.
#[async_trait]
pub trait ConversationSummarizer: Send + Sync {
    async fn summarize(&self, evicted: &str) -> AidfResult<String>;
}
