//! Command handlers.

pub mod plan;
pub mod quick;
pub mod run;
pub mod status;
pub mod verify;

use std::path::{Path, PathBuf};

use crate::domain::error::AidfResult;
use crate::domain::models::config::Config;
use crate::domain::models::report::ExecutionReport;
use crate::infrastructure::config::ConfigLoader;
use crate::services::context_loader::discover_project_root;
use tracing::warn;

/// Discover the project root from the working directory and load its
/// config.
pub fn workspace() -> AidfResult<(PathBuf, Config)> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let root = discover_project_root(&cwd).ok_or_else(|| {
        crate::domain::error::AidfError::config(
            crate::domain::error::ConfigCode::Missing,
            format!(
                "no .ai/AGENTS.md or .ai/config.yml found walking up from {}",
                cwd.display()
            ),
        )
    })?;
    let config = ConfigLoader::load(&root.join(".ai"))?;
    Ok((root, config))
}

/// Persist a run report under `.ai/reports/YYYY-MM-DD/run-<shortId>.json`.
/// Best-effort: a report that cannot be written is a warning, not a
/// failure.
pub fn write_report(project_root: &Path, report: &ExecutionReport) {
    let date = report.timestamp.format("%Y-%m-%d").to_string();
    let dir = project_root.join(".ai").join("reports").join(date);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!(error = %e, "could not create reports directory");
        return;
    }
    let short: String = report.run_id.chars().filter(|c| *c != '-').take(8).collect();
    let path = dir.join(format!("run-{short}.json"));
    match serde_json::to_string_pretty(report) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&path, json) {
                warn!(error = %e, "could not write run report");
            }
        }
        Err(e) => warn!(error = %e, "could not serialize run report"),
    }
}
