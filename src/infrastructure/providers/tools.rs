//! Tool execution for the HTTP tool-calling providers.
//!
//! Every tool call is bound to the working directory and routed through the
//! scope guard, the command policy, and the secret scanner. Scope refusals
//! are reported back to the model as tool errors so it can adjust; command
//! policy violations abort the task.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::error::{AidfError, AidfResult, PermissionCode};
use crate::domain::models::execution::CompletionSignal;
use crate::domain::models::task::{ChangeKind, FileChange};
use crate::services::scope_guard::{FileDecision, ScopeGuard};
use crate::services::secret_scanner::SecretScanner;

/// Commands the policy refuses outright.
const DENIED_COMMAND_WORDS: &[&str] = &["sudo", "eval"];

/// The fixed tool schema shared by every API provider, in a neutral
/// `{name, description, input_schema}` shape.
pub fn tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "name": "read_file",
            "description": "Read a file relative to the project root.",
            "input_schema": {
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }
        }),
        json!({
            "name": "write_file",
            "description": "Write a file relative to the project root, creating parent directories.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }
        }),
        json!({
            "name": "list_files",
            "description": "List directory entries relative to the project root.",
            "input_schema": {
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": []
            }
        }),
        json!({
            "name": "run_command",
            "description": "Run a shell command in the project root.",
            "input_schema": {
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"]
            }
        }),
        json!({
            "name": "task_complete",
            "description": "Signal that the task is fully done.",
            "input_schema": { "type": "object", "properties": {}, "required": [] }
        }),
        json!({
            "name": "task_blocked",
            "description": "Signal that the task cannot proceed, with a reason.",
            "input_schema": {
                "type": "object",
                "properties": { "reason": { "type": "string" } },
                "required": ["reason"]
            }
        }),
    ]
}

/// Result of one tool invocation, fed back into the conversation.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    pub content: String,
    pub is_error: bool,
    /// Set by `task_complete` / `task_blocked`; ends the round.
    pub signal: Option<CompletionSignal>,
}

impl ToolResponse {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            signal: None,
        }
    }

    fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            signal: None,
        }
    }
}

/// Reject commands the policy forbids: `sudo`/`eval` anywhere in the
/// pipeline, backticks, and `$(...)` subshells.
pub fn vet_command(command: &str) -> Result<(), String> {
    if command.contains('`') {
        return Err("backtick substitution is not allowed".to_string());
    }
    if command.contains("$(") {
        return Err("subshell substitution is not allowed".to_string());
    }
    for segment in command.split(['|', ';', '&']) {
        for word in segment.split_whitespace() {
            if DENIED_COMMAND_WORDS.contains(&word) {
                return Err(format!("command word `{word}` is not allowed"));
            }
        }
    }
    Ok(())
}

/// Executes tool calls for an API provider.
pub struct ToolHandler {
    cwd: PathBuf,
    scope_guard: Arc<ScopeGuard>,
    scanner: Arc<SecretScanner>,
    changes: Mutex<Vec<FileChange>>,
}

impl ToolHandler {
    pub fn new(cwd: PathBuf, scope_guard: Arc<ScopeGuard>, scanner: Arc<SecretScanner>) -> Self {
        Self {
            cwd,
            scope_guard,
            scanner,
            changes: Mutex::new(Vec::new()),
        }
    }

    /// Drain the file changes observed since the last call.
    pub fn take_changes(&self) -> Vec<FileChange> {
        std::mem::take(&mut self.changes.lock().expect("changes lock"))
    }

    /// Execute one tool call. Errors abort the task; refusals the model can
    /// react to come back as `is_error` responses.
    pub async fn handle(&self, name: &str, input: &Value) -> AidfResult<ToolResponse> {
        debug!(tool = name, "executing tool call");
        match name {
            "read_file" => self.read_file(input).await,
            "write_file" => self.write_file(input).await,
            "list_files" => self.list_files(input).await,
            "run_command" => self.run_command(input).await,
            "task_complete" => Ok(ToolResponse {
                content: "acknowledged".to_string(),
                is_error: false,
                signal: Some(CompletionSignal::Complete),
            }),
            "task_blocked" => {
                let reason = input
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified")
                    .to_string();
                Ok(ToolResponse {
                    content: "acknowledged".to_string(),
                    is_error: false,
                    signal: Some(CompletionSignal::Blocked(reason)),
                })
            }
            other => Ok(ToolResponse::error(format!("unknown tool `{other}`"))),
        }
    }

    /// Resolve a tool-supplied path inside the working directory, rejecting
    /// absolute paths and parent escapes.
    fn resolve(&self, raw: &str) -> AidfResult<PathBuf> {
        let candidate = Path::new(raw);
        if candidate.is_absolute()
            || candidate
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(AidfError::permission(
                PermissionCode::FileAccess,
                format!("path `{raw}` escapes the working directory"),
            )
            .with_context("path", raw));
        }
        Ok(self.cwd.join(candidate))
    }

    async fn read_file(&self, input: &Value) -> AidfResult<ToolResponse> {
        let raw = require_str(input, "path")?;
        let path = self.resolve(raw)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(ToolResponse::ok(content)),
            Err(e) => Ok(ToolResponse::error(format!("could not read {raw}: {e}"))),
        }
    }

    async fn write_file(&self, input: &Value) -> AidfResult<ToolResponse> {
        let raw = require_str(input, "path")?;
        let content = require_str(input, "content")?;

        match self.scope_guard.check_file(raw) {
            FileDecision::Allow => {}
            FileDecision::AskUser => {
                return Ok(ToolResponse::error(format!(
                    "writing {raw} requires user approval; it was not granted"
                )));
            }
            FileDecision::Block(code) => {
                warn!(path = raw, code = code.as_str(), "tool write refused by scope guard");
                return Ok(ToolResponse::error(format!(
                    "writing {raw} is not allowed by the task scope ({})",
                    code.as_str()
                )));
            }
        }

        let mut to_write = content.to_string();
        if !self.scanner.is_file_allowed(raw) {
            let outcome = self.scanner.scan(content);
            if outcome.should_block() {
                return Ok(ToolResponse::error(format!(
                    "content for {raw} contains secret material; write refused"
                )));
            }
            if !outcome.is_clean() {
                warn!(path = raw, findings = outcome.findings.len(), "secrets in written content");
                to_write = outcome.output;
            }
        }

        let path = self.resolve(raw)?;
        let existed = path.exists();
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResponse::error(format!("could not create {raw}: {e}")));
            }
        }
        match tokio::fs::write(&path, to_write).await {
            Ok(()) => {
                let kind = if existed {
                    ChangeKind::Modified
                } else {
                    ChangeKind::Created
                };
                self.changes
                    .lock()
                    .expect("changes lock")
                    .push(FileChange::new(raw, kind));
                Ok(ToolResponse::ok(format!("wrote {raw}")))
            }
            Err(e) => Ok(ToolResponse::error(format!("could not write {raw}: {e}"))),
        }
    }

    async fn list_files(&self, input: &Value) -> AidfResult<ToolResponse> {
        let raw = input.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = self.resolve(raw)?;
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(e) => return Ok(ToolResponse::error(format!("could not list {raw}: {e}"))),
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let suffix = if entry.path().is_dir() { "/" } else { "" };
            entries.push(format!("{name}{suffix}"));
        }
        entries.sort();
        Ok(ToolResponse::ok(entries.join("\n")))
    }

    async fn run_command(&self, input: &Value) -> AidfResult<ToolResponse> {
        let command = require_str(input, "command")?;
        if let Err(reason) = vet_command(command) {
            return Err(AidfError::permission(
                PermissionCode::CommandBlocked,
                format!("command `{command}` refused: {reason}"),
            )
            .with_context("command", command));
        }

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.cwd)
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => return Ok(ToolResponse::error(format!("command failed to spawn: {e}"))),
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let scan = self.scanner.scan(&combined);
        if scan.should_block() {
            return Ok(ToolResponse::error(
                "command output contained secret material and was withheld".to_string(),
            ));
        }
        let content = scan.output;

        if output.status.success() {
            Ok(ToolResponse::ok(content))
        } else {
            Ok(ToolResponse::error(format!(
                "exit {:?}\n{content}",
                output.status.code()
            )))
        }
    }
}

fn require_str<'a>(input: &'a Value, key: &str) -> AidfResult<&'a str> {
    input.get(key).and_then(Value::as_str).ok_or_else(|| {
        AidfError::permission(
            PermissionCode::FileAccess,
            format!("tool call is missing required string field `{key}`"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::{ScopeMode, SecretsConfig, SecretsMode};
    use crate::domain::models::task::TaskScope;
    use tempfile::TempDir;

    fn handler(tmp: &TempDir, secrets_mode: SecretsMode) -> ToolHandler {
        let scope = TaskScope {
            allowed: vec!["src/**".into()],
            ..Default::default()
        };
        let guard = Arc::new(ScopeGuard::new(&scope, ScopeMode::Strict).unwrap());
        let scanner = Arc::new(SecretScanner::new(SecretsConfig {
            mode: secrets_mode,
            entropy_detection: false,
            allowed_files: vec![],
            allowed_patterns: vec![],
        }));
        ToolHandler::new(tmp.path().to_path_buf(), guard, scanner)
    }

    #[test]
    fn test_vet_command_deny_list() {
        assert!(vet_command("cargo test").is_ok());
        assert!(vet_command("sudo rm -rf /").is_err());
        assert!(vet_command("echo hi && sudo reboot").is_err());
        assert!(vet_command("eval $CMD").is_err());
        assert!(vet_command("echo `whoami`").is_err());
        assert!(vet_command("echo $(whoami)").is_err());
        // `sudoku` is not `sudo`.
        assert!(vet_command("cat sudoku.txt").is_ok());
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let h = handler(&tmp, SecretsMode::Warn);

        let resp = h
            .handle("write_file", &json!({"path": "src/new.rs", "content": "fn main() {}"}))
            .await
            .unwrap();
        assert!(!resp.is_error);

        let resp = h
            .handle("read_file", &json!({"path": "src/new.rs"}))
            .await
            .unwrap();
        assert_eq!(resp.content, "fn main() {}");

        let changes = h.take_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "src/new.rs");
        assert_eq!(changes[0].kind, ChangeKind::Created);
        assert!(h.take_changes().is_empty());
    }

    #[tokio::test]
    async fn test_write_outside_scope_is_tool_error() {
        let tmp = TempDir::new().unwrap();
        let h = handler(&tmp, SecretsMode::Warn);
        let resp = h
            .handle("write_file", &json!({"path": "docs/x.md", "content": "hi"}))
            .await
            .unwrap();
        assert!(resp.is_error);
        assert!(!tmp.path().join("docs/x.md").exists());
    }

    #[tokio::test]
    async fn test_write_implicit_forbidden_refused() {
        let tmp = TempDir::new().unwrap();
        let h = handler(&tmp, SecretsMode::Warn);
        let resp = h
            .handle("write_file", &json!({"path": ".env", "content": "KEY=1"}))
            .await
            .unwrap();
        assert!(resp.is_error);
    }

    #[tokio::test]
    async fn test_secret_content_blocked() {
        let tmp = TempDir::new().unwrap();
        let h = handler(&tmp, SecretsMode::Block);
        let resp = h
            .handle(
                "write_file",
                &json!({"path": "src/cfg.rs", "content": "let key = \"sk-ant-REDACTED\";"}),
            )
            .await
            .unwrap();
        assert!(resp.is_error);
        assert!(!tmp.path().join("src/cfg.rs").exists());
    }

    #[tokio::test]
    async fn test_path_escape_is_permission_error() {
        let tmp = TempDir::new().unwrap();
        let h = handler(&tmp, SecretsMode::Warn);
        let err = h
            .handle("read_file", &json!({"path": "../outside.txt"}))
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "FILE_ACCESS");
    }

    #[tokio::test]
    async fn test_denied_command_aborts() {
        let tmp = TempDir::new().unwrap();
        let h = handler(&tmp, SecretsMode::Warn);
        let err = h
            .handle("run_command", &json!({"command": "sudo make install"}))
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "COMMAND_BLOCKED");
    }

    #[tokio::test]
    async fn test_run_command_captures_output() {
        let tmp = TempDir::new().unwrap();
        let h = handler(&tmp, SecretsMode::Warn);
        let resp = h
            .handle("run_command", &json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert!(!resp.is_error);
        assert!(resp.content.contains("hello"));
    }

    #[tokio::test]
    async fn test_completion_signals() {
        let tmp = TempDir::new().unwrap();
        let h = handler(&tmp, SecretsMode::Warn);
        let resp = h.handle("task_complete", &json!({})).await.unwrap();
        assert_eq!(resp.signal, Some(CompletionSignal::Complete));

        let resp = h
            .handle("task_blocked", &json!({"reason": "missing schema"}))
            .await
            .unwrap();
        assert_eq!(
            resp.signal,
            Some(CompletionSignal::Blocked("missing schema".into()))
        );
    }
}
