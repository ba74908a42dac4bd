//! Subprocess provider: drives a CLI coding agent (claude, cursor-agent)
//! through stdin/stdout.
//!
//! The prompt goes in on stdin; stdout is streamed to the `on_output`
//! callback while being accumulated; file changes are detected by diffing
//! `git status` snapshots taken before and after the call. Token usage is
//! estimated from character counts and flagged as such.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::domain::error::{AidfError, AidfResult, ProviderCode, TimeoutCode};
use crate::domain::models::config::{PermissionsConfig, ProviderConfig, ProviderKind};
use crate::domain::models::context::estimate_tokens;
use crate::domain::models::execution::{CompletionSignal, ExecutionResult, TokenUsage};
use crate::domain::models::task::FileChange;
use crate::domain::ports::{ExecuteOptions, GitClient, Provider};

/// Marker stored as conversation state for CLIs that keep their own session.
const CLI_SESSION_MARKER: &str = "cli-session";

pub struct SubprocessProvider {
    kind: ProviderKind,
    command: String,
    model: Option<String>,
    skip_permissions: bool,
    git: Arc<dyn GitClient>,
}

impl SubprocessProvider {
    pub fn new(
        provider: &ProviderConfig,
        permissions: &PermissionsConfig,
        git: Arc<dyn GitClient>,
    ) -> Self {
        let command = provider.command.clone().unwrap_or_else(|| {
            match provider.kind {
                ProviderKind::SubprocessCursor => "cursor-agent",
                _ => "claude",
            }
            .to_string()
        });
        Self {
            kind: provider.kind,
            command,
            model: provider.model.clone(),
            skip_permissions: permissions.skip_permissions,
            git,
        }
    }

    fn build_command(&self, continue_session: bool) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--print");
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        if self.skip_permissions && self.kind == ProviderKind::SubprocessClaude {
            cmd.arg("--dangerously-skip-permissions");
        }
        if continue_session && self.supports_session_continuation() {
            cmd.arg("--continue");
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Working-tree paths dirty now but not in the snapshot.
    fn diff_snapshots(before: &[FileChange], after: Vec<FileChange>) -> Vec<FileChange> {
        let known: BTreeMap<&str, &FileChange> =
            before.iter().map(|c| (c.path.as_str(), c)).collect();
        after
            .into_iter()
            .filter(|c| match known.get(c.path.as_str()) {
                None => true,
                Some(prev) => prev.kind != c.kind,
            })
            .collect()
    }
}

#[async_trait]
impl Provider for SubprocessProvider {
    async fn execute(&self, prompt: &str, opts: &ExecuteOptions) -> AidfResult<ExecutionResult> {
        if !self.is_available().await {
            return Err(AidfError::provider(
                ProviderCode::NotAvailable,
                format!("`{}` is not on PATH or not runnable", self.command),
            )
            .with_context("command", self.command.clone()));
        }

        let snapshot = self.git.changed_files().await.unwrap_or_default();

        let mut cmd = self.build_command(opts.conversation_state.is_some());
        debug!(command = %self.command, "spawning subprocess agent");
        let mut child = cmd.spawn().map_err(|e| {
            AidfError::provider(
                ProviderCode::Crash,
                format!("failed to spawn `{}`: {e}", self.command),
            )
        })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            AidfError::provider(ProviderCode::Crash, "no stdin handle on child process")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AidfError::provider(ProviderCode::Crash, "no stdout handle on child process")
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            AidfError::provider(ProviderCode::Crash, "no stderr handle on child process")
        })?;

        stdin.write_all(prompt.as_bytes()).await.map_err(|e| {
            AidfError::provider(ProviderCode::Crash, format!("failed to write prompt: {e}"))
        })?;
        drop(stdin);

        let on_output = opts.on_output.clone();
        let read_streams = async {
            let stdout_task = async {
                let mut reader = BufReader::new(stdout).lines();
                let mut collected = String::new();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Some(cb) = &on_output {
                        cb(&line);
                    }
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            };
            let stderr_task = async {
                let mut reader = BufReader::new(stderr).lines();
                let mut collected = String::new();
                while let Ok(Some(line)) = reader.next_line().await {
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            };
            let (out, err) = tokio::join!(stdout_task, stderr_task);
            let status = child.wait().await;
            (out, err, status)
        };

        let timeout_ms = if opts.timeout_ms == 0 { 300_000 } else { opts.timeout_ms };
        let (output, errors, status) =
            match timeout(Duration::from_millis(timeout_ms), read_streams).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_ms, "subprocess agent timed out; killing");
                    return Err(AidfError::timeout(
                        TimeoutCode::OperationTimeout,
                        format!("agent subprocess exceeded {timeout_ms} ms"),
                    )
                    .with_context("command", self.command.clone()));
                }
            };

        let status = status.map_err(|e| {
            AidfError::provider(ProviderCode::Crash, format!("failed to await subprocess: {e}"))
        })?;

        if !status.success() {
            return Err(AidfError::provider(
                ProviderCode::Crash,
                format!(
                    "`{}` exited with {:?}: {}",
                    self.command,
                    status.code(),
                    errors.chars().take(200).collect::<String>()
                ),
            )
            .with_context("exit_code", format!("{:?}", status.code())));
        }
        if output.trim().is_empty() {
            return Err(AidfError::provider(
                ProviderCode::Crash,
                "agent produced no output",
            ));
        }
        if !errors.is_empty() {
            debug!(stderr_len = errors.len(), "subprocess agent wrote to stderr");
        }

        let after = self.git.changed_files().await.unwrap_or_default();
        let files_changed = Self::diff_snapshots(&snapshot, after);

        let token_usage = TokenUsage::estimated(
            estimate_tokens(prompt) as u64,
            estimate_tokens(&output) as u64,
        );

        info!(
            output_len = output.len(),
            files_changed = files_changed.len(),
            "subprocess agent finished"
        );

        Ok(ExecutionResult {
            completion_signal: CompletionSignal::parse(&output),
            output,
            files_changed,
            token_usage: Some(token_usage),
            conversation_metrics: None,
            conversation_state: self
                .supports_session_continuation()
                .then(|| CLI_SESSION_MARKER.to_string()),
        })
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        self.kind.as_str()
    }

    /// The claude CLI keeps a per-directory session that `--continue`
    /// resumes; cursor-agent does not.
    fn supports_session_continuation(&self) -> bool {
        self.kind == ProviderKind::SubprocessClaude
    }
}
