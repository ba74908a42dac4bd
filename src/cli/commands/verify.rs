//! `aidf verify <taskPath>` — post-hoc checks on a finished task.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use console::style;

use crate::services::context_loader::ContextLoader;
use crate::services::scope_guard::{FileDecision, ScopeGuard};
use crate::services::secret_scanner::SecretScanner;
use crate::services::validator::Validator;

use super::workspace;

pub async fn handle_verify(task_path: PathBuf, scan_only: bool) -> Result<bool> {
    let (root, config) = workspace()?;
    let loader = ContextLoader::new(&root)?;
    let task = loader.load_task(&task_path)?;

    let files = recorded_files(&task.raw, &task.creates);
    let scanner = Arc::new(SecretScanner::new(config.secrets.clone()));
    let mut ok = true;

    // Secret scan of the files the task touched.
    for file in &files {
        let path = root.join(file);
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        if scanner.is_file_allowed(file) {
            continue;
        }
        let outcome = scanner.scan(&content);
        if !outcome.is_clean() {
            ok = false;
            println!(
                "{} {file}: {} secret finding(s)",
                style("secrets").red(),
                outcome.findings.len()
            );
        }
    }

    if scan_only {
        return Ok(ok);
    }

    // Every recorded file must still pass the task's own scope.
    let guard = ScopeGuard::new(task.scope(), config.scope_enforcement)?;
    for file in &files {
        if let FileDecision::Block(code) = guard.check_file(file) {
            ok = false;
            println!(
                "{} {file} violates the task scope ({})",
                style("scope").red(),
                code.as_str()
            );
        }
    }

    // Re-run the pre-commit validation commands.
    let validator = Validator::new(config.validation.clone(), root.clone());
    let summary = validator.pre_commit().await?;
    if !summary.passed {
        ok = false;
        if let Some(err) = &summary.error {
            println!("{} {err}", style("validation").red());
        }
    }

    if ok {
        println!("{} {}", style("verified").green(), task.title);
    }
    Ok(ok)
}

/// Files listed in the written status section, falling back to declared
/// `creates`.
fn recorded_files(task_content: &str, creates: &[String]) -> Vec<String> {
    let from_status = task_content.lines().find_map(|line| {
        line.trim().strip_prefix("- Files: ").map(|list| {
            list.split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect::<Vec<_>>()
        })
    });
    from_status.unwrap_or_else(|| creates.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_files_prefers_status_section() {
        let content = "## Status: COMPLETED\n- Iterations: 1\n- Files: src/a.rs, src/b.rs\n";
        assert_eq!(
            recorded_files(content, &["src/c.rs".to_string()]),
            vec!["src/a.rs".to_string(), "src/b.rs".to_string()]
        );
    }

    #[test]
    fn test_recorded_files_falls_back_to_creates() {
        assert_eq!(
            recorded_files("## Goal\nx\n", &["src/c.rs".to_string()]),
            vec!["src/c.rs".to_string()]
        );
    }
}
