//! `aidf plan run <planPath>`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::cli::output;
use crate::services::executor::ExecutorDeps;
use crate::services::parallel::{ParallelExecutor, ParallelOptions};

use super::{workspace, write_report};

pub async fn handle_plan_run(
    plan_path: PathBuf,
    concurrency: usize,
    continue_on_error: bool,
    dry_run: bool,
) -> Result<bool> {
    let (root, config) = workspace()?;

    let deps_root = root.clone();
    let executor = ParallelExecutor::new(
        config,
        ParallelOptions {
            concurrency,
            continue_on_error,
            dry_run,
        },
        root.clone(),
        Arc::new(move || ExecutorDeps::production(&deps_root)),
    );

    let result = executor.run(&plan_path).await?;
    for task in &result.per_task {
        if let Some(report) = &task.result.report {
            write_report(&root, report);
        }
    }
    output::print_plan_result(&result);
    Ok(result.success)
}
