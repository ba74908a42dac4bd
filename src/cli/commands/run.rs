//! `aidf run <taskPath>`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use console::style;

use crate::cli::{apply_profile, output, Profile};
use crate::domain::models::execution::ExecutorStatus;
use crate::services::executor::{Executor, ExecutorDeps, ExecutorOptions};

use super::{workspace, write_report};

pub async fn handle_run(
    task_path: PathBuf,
    resume: bool,
    dry_run: bool,
    profile: Option<Profile>,
) -> Result<bool> {
    let (root, mut config) = workspace()?;
    if let Some(profile) = profile {
        apply_profile(&mut config, profile);
    }

    let mut deps = ExecutorDeps::production(&root);
    deps.on_output = Some(Arc::new(|chunk: &str| {
        println!("{chunk}");
    }));
    deps.on_retry = Some(Arc::new(|attempt, delay_ms, message| {
        eprintln!(
            "{} attempt {attempt}, waiting {delay_ms} ms: {message}",
            style("retry").yellow()
        );
    }));

    let mut executor = Executor::new(
        config,
        ExecutorOptions {
            resume,
            dry_run,
            previous_summaries: Vec::new(),
        },
        deps,
        root.clone(),
        task_path,
    );

    let result = executor.run().await;
    if let Some(report) = &result.report {
        write_report(&root, report);
    }
    output::print_run_result(&result);

    Ok(matches!(
        result.status,
        ExecutorStatus::Completed | ExecutorStatus::Idle
    ))
}
