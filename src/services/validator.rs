//! Validation command runner for phase boundaries.
//!
//! Commands run in order through `sh -c`; a phase passes iff every command
//! exits 0. The first failure is captured as a `validation` error so the
//! executor can feed its output back to the agent.

use std::path::PathBuf;
use std::time::Instant;

use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use crate::domain::error::{AidfError, AidfResult, TimeoutCode, ValidationCode};
use crate::domain::models::config::ValidationConfig;

/// Outcome of one command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: String,
    pub exit_code: Option<i32>,
    /// Combined stdout + stderr.
    pub output: String,
    pub duration_ms: u64,
}

impl CommandResult {
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Outcome of one phase.
#[derive(Debug, Clone)]
pub struct ValidationSummary {
    pub phase: ValidationCode,
    pub passed: bool,
    pub results: Vec<CommandResult>,
    /// The first failing command, as the categorized error.
    pub error: Option<AidfError>,
}

/// Runs the configured commands for each phase.
pub struct Validator {
    config: ValidationConfig,
    cwd: PathBuf,
}

impl Validator {
    pub fn new(config: ValidationConfig, cwd: PathBuf) -> Self {
        Self { config, cwd }
    }

    pub async fn pre_commit(&self) -> AidfResult<ValidationSummary> {
        self.run_phase(ValidationCode::PreCommit).await
    }

    pub async fn pre_push(&self) -> AidfResult<ValidationSummary> {
        self.run_phase(ValidationCode::PrePush).await
    }

    pub async fn pre_pr(&self) -> AidfResult<ValidationSummary> {
        self.run_phase(ValidationCode::PrePr).await
    }

    fn commands_for(&self, phase: ValidationCode) -> &[String] {
        match phase {
            ValidationCode::PreCommit => &self.config.pre_commit,
            ValidationCode::PrePush => &self.config.pre_push,
            ValidationCode::PrePr => &self.config.pre_pr,
        }
    }

    /// Run a phase's commands in order. Returns `Err` only on timeout;
    /// ordinary command failure is reported in the summary.
    pub async fn run_phase(&self, phase: ValidationCode) -> AidfResult<ValidationSummary> {
        let commands = self.commands_for(phase);
        let mut results = Vec::with_capacity(commands.len());
        let mut error = None;

        for command in commands {
            let result = self.run_command(phase, command).await?;
            debug!(
                phase = phase.as_str(),
                command,
                exit_code = ?result.exit_code,
                duration_ms = result.duration_ms,
                "validation command finished"
            );
            let failed = !result.passed();
            if failed && error.is_none() {
                error = Some(AidfError::validation(
                    phase,
                    command.clone(),
                    result.exit_code,
                    result.output.clone(),
                ));
            }
            results.push(result);
            if failed {
                break;
            }
        }

        let passed = error.is_none();
        info!(
            phase = phase.as_str(),
            passed,
            commands = results.len(),
            "validation phase finished"
        );
        Ok(ValidationSummary {
            phase,
            passed,
            results,
            error,
        })
    }

    async fn run_command(&self, phase: ValidationCode, command: &str) -> AidfResult<CommandResult> {
        let started = Instant::now();
        let run = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.cwd)
            .kill_on_drop(true)
            .output();

        let output = timeout(Duration::from_millis(self.config.command_timeout_ms), run)
            .await
            .map_err(|_| {
                AidfError::timeout(
                    TimeoutCode::OperationTimeout,
                    format!(
                        "validation command `{command}` exceeded {} ms",
                        self.config.command_timeout_ms
                    ),
                )
                .with_context("command", command)
            })?
            .map_err(|e| AidfError::validation(phase, command, None, e.to_string()))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandResult {
            command: command.to_string(),
            exit_code: output.status.code(),
            output: combined,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(pre_commit: Vec<&str>) -> Validator {
        Validator::new(
            ValidationConfig {
                pre_commit: pre_commit.into_iter().map(String::from).collect(),
                command_timeout_ms: 5_000,
                ..Default::default()
            },
            std::env::temp_dir(),
        )
    }

    #[tokio::test]
    async fn test_phase_passes_when_all_exit_zero() {
        let summary = validator(vec!["true", "echo ok"]).pre_commit().await.unwrap();
        assert!(summary.passed);
        assert_eq!(summary.results.len(), 2);
        assert!(summary.error.is_none());
        assert!(summary.results[1].output.contains("ok"));
    }

    #[tokio::test]
    async fn test_first_failure_is_captured() {
        let summary = validator(vec!["echo before", "sh -c 'echo broken >&2; exit 3'", "echo never"])
            .pre_commit()
            .await
            .unwrap();
        assert!(!summary.passed);
        // Stops at the failing command.
        assert_eq!(summary.results.len(), 2);
        let err = summary.error.expect("failure should be captured");
        assert_eq!(err.code_str(), "PRE_COMMIT");
        match err {
            AidfError::Validation {
                exit_code, output, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(output.contains("broken"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_phase_passes() {
        let summary = validator(vec![]).pre_commit().await.unwrap();
        assert!(summary.passed);
        assert!(summary.results.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_operation_timeout() {
        let v = Validator::new(
            ValidationConfig {
                pre_commit: vec!["sleep 5".into()],
                command_timeout_ms: 50,
                ..Default::default()
            },
            std::env::temp_dir(),
        );
        let err = v.pre_commit().await.unwrap_err();
        assert_eq!(err.code_str(), "OPERATION_TIMEOUT");
    }
}
