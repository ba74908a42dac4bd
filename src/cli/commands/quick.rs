//! `aidf quick "<description>"` — one-shot task without authoring a file.

use std::sync::Arc;

use anyhow::Result;
use console::style;

use crate::domain::models::execution::ExecutorStatus;
use crate::services::executor::{Executor, ExecutorDeps, ExecutorOptions};

use super::{workspace, write_report};

/// Iteration cap for quick tasks unless `--full` restores the configured
/// budget.
const QUICK_MAX_ITERATIONS: u32 = 5;

pub async fn handle_quick(
    description: String,
    full: bool,
    max_iterations: Option<u32>,
) -> Result<bool> {
    let (root, mut config) = workspace()?;
    if let Some(max) = max_iterations {
        config.execution.max_iterations = max;
    } else if !full {
        config.execution.max_iterations =
            config.execution.max_iterations.min(QUICK_MAX_ITERATIONS);
    }

    // Materialize the description as a pending task file; the normal
    // lifecycle (status section, terminal-directory move) then applies.
    let short = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let id = format!("quick-{short}");
    let title: String = description
        .chars()
        .take(60)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    // Quoted so descriptions with colons survive the YAML frontmatter.
    let yaml_title = title.replace('\\', "\\\\").replace('"', "\\\"");
    let content = format!(
        "---\nid: {id}\ntitle: \"{yaml_title}\"\ntype: quick\nscope:\n  allowed:\n    - \"**\"\n---\n\n\
         # {title}\n\n## Goal\n\n{description}\n\n## Requirements\n\n- Complete the described change.\n\n\
         ## Definition of Done\n\n- The described change works.\n"
    );
    let task_dir = root.join(".ai").join("tasks").join("pending");
    std::fs::create_dir_all(&task_dir)?;
    let task_path = task_dir.join(format!("{id}.md"));
    std::fs::write(&task_path, content)?;
    println!("{} {}", style("created").dim(), task_path.display());

    let mut deps = ExecutorDeps::production(&root);
    deps.on_output = Some(Arc::new(|chunk: &str| println!("{chunk}")));

    let mut executor = Executor::new(
        config,
        ExecutorOptions::default(),
        deps,
        root.clone(),
        task_path,
    );
    let result = executor.run().await;
    if let Some(report) = &result.report {
        write_report(&root, report);
    }
    crate::cli::output::print_run_result(&result);
    Ok(result.status == ExecutorStatus::Completed)
}
