//! Git client over the `git` binary.
//!
//! All paths are relative to the repository root the client was built with.
//! Reverting an untracked file means deleting it; reverting a tracked file
//! means checking out its HEAD state.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::error::{AidfError, AidfResult, GitCode};
use crate::domain::models::task::{ChangeKind, FileChange};
use crate::domain::ports::GitClient;

pub struct GitCli {
    cwd: PathBuf,
}

impl GitCli {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    async fn run(&self, args: &[&str]) -> AidfResult<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.cwd)
            .output()
            .await
            .map_err(|e| {
                AidfError::git(GitCode::StatusFailed, format!("failed to spawn git: {e}"))
            })
    }

    async fn run_checked(&self, args: &[&str], code: GitCode) -> AidfResult<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AidfError::git(
                code,
                format!("git {} failed: {stderr}", args.first().unwrap_or(&"")),
            )
            .with_context("exit_code", format!("{:?}", output.status.code())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Parse one `git status --porcelain` line into a change.
fn parse_porcelain_line(line: &str) -> Option<FileChange> {
    if line.len() < 4 {
        return None;
    }
    let (status, rest) = line.split_at(2);
    let path = rest.trim_start();
    // Renames are reported as `R  old -> new`; the new path is the change.
    let path = path.rsplit(" -> ").next().unwrap_or(path);
    let path = path.trim_matches('"').to_string();

    let kind = if status == "??" {
        ChangeKind::Created
    } else if status.contains('D') {
        ChangeKind::Deleted
    } else if status.contains('A') {
        ChangeKind::Created
    } else {
        ChangeKind::Modified
    };
    Some(FileChange { path, kind })
}

#[async_trait]
impl GitClient for GitCli {
    async fn is_repo(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn changed_files(&self) -> AidfResult<Vec<FileChange>> {
        let stdout = self
            .run_checked(&["status", "--porcelain"], GitCode::StatusFailed)
            .await?;
        Ok(stdout.lines().filter_map(parse_porcelain_line).collect())
    }

    async fn stage(&self, paths: &[String]) -> AidfResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args, GitCode::CommitFailed).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> AidfResult<()> {
        self.run_checked(&["commit", "-m", message], GitCode::CommitFailed)
            .await?;
        debug!(message, "created commit");
        Ok(())
    }

    async fn push(&self) -> AidfResult<()> {
        self.run_checked(&["push"], GitCode::PushFailed).await?;
        Ok(())
    }

    async fn revert_paths(&self, paths: &[String]) -> AidfResult<()> {
        for path in paths {
            let mut checkout = vec!["checkout", "--"];
            checkout.push(path);
            let output = self.run(&checkout).await?;
            if output.status.success() {
                continue;
            }
            // Untracked files have no HEAD state to restore; deleting them
            // is the revert.
            let full = self.cwd.join(path);
            match tokio::fs::remove_file(&full).await {
                Ok(()) => {
                    warn!(path, "removed untracked file during revert");
                }
                Err(e) => {
                    return Err(AidfError::git(
                        GitCode::RevertFailed,
                        format!("could not revert {path}: {e}"),
                    )
                    .with_context("path", path.clone()));
                }
            }
        }
        Ok(())
    }

    async fn current_branch(&self) -> AidfResult<String> {
        let branch = self
            .run_checked(&["rev-parse", "--abbrev-ref", "HEAD"], GitCode::StatusFailed)
            .await?;
        Ok(branch.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_porcelain_untracked() {
        let change = parse_porcelain_line("?? src/new.rs").unwrap();
        assert_eq!(change.path, "src/new.rs");
        assert_eq!(change.kind, ChangeKind::Created);
    }

    #[test]
    fn test_parse_porcelain_modified_and_deleted() {
        assert_eq!(
            parse_porcelain_line(" M src/lib.rs").unwrap().kind,
            ChangeKind::Modified
        );
        assert_eq!(
            parse_porcelain_line(" D old.rs").unwrap().kind,
            ChangeKind::Deleted
        );
        assert_eq!(
            parse_porcelain_line("A  staged.rs").unwrap().kind,
            ChangeKind::Created
        );
    }

    #[test]
    fn test_parse_porcelain_rename_uses_new_path() {
        let change = parse_porcelain_line("R  old.rs -> new.rs").unwrap();
        assert_eq!(change.path, "new.rs");
    }

    #[test]
    fn test_parse_porcelain_skips_short_lines() {
        assert!(parse_porcelain_line("").is_none());
        assert!(parse_porcelain_line("M").is_none());
    }
}
