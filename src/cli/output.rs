//! Terminal output helpers: tables and styled run summaries.

use comfy_table::{presets::UTF8_FULL, Cell, Table};
use console::style;

use crate::domain::models::execution::{ExecutorResult, ExecutorStatus};
use crate::services::parallel::ParallelExecutionResult;

pub fn status_table(counts: &[(&str, usize)]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["State", "Tasks"]);
    for (state, count) in counts {
        table.add_row(vec![Cell::new(state), Cell::new(count)]);
    }
    table
}

pub fn print_run_result(result: &ExecutorResult) {
    let status = match result.status {
        ExecutorStatus::Completed => style(result.status.as_str()).green(),
        ExecutorStatus::Blocked => style(result.status.as_str()).yellow(),
        _ => style(result.status.as_str()).red(),
    };
    println!(
        "{status} after {} iteration(s) in {} ms",
        result.iteration, result.duration_ms
    );
    if !result.files_modified.is_empty() {
        println!("files: {}", result.files_modified.join(", "));
    }
    println!(
        "tokens: {} in / {} out{}",
        result.token_usage.input_tokens,
        result.token_usage.output_tokens,
        if result.token_usage.estimated {
            " (estimated)"
        } else {
            ""
        }
    );
    if let Some(err) = &result.error {
        println!("{}: [{}] {err}", style("error").red(), err.code_str());
    }
}

pub fn print_plan_result(result: &ParallelExecutionResult) {
    let headline = if result.success {
        style("plan completed").green()
    } else {
        style("plan failed").red()
    };
    println!(
        "{headline}: {} completed, {} failed, {} blocked, {} skipped",
        result.completed.len(),
        result.failed.len(),
        result.blocked.len(),
        result.skipped.len()
    );
    if !result.file_conflicts.is_empty() {
        println!(
            "{} runtime conflict(s): {}",
            style("note").yellow(),
            result.file_conflicts.join(", ")
        );
    }
    for verification in &result.wave_verifications {
        if !verification.passed() {
            println!(
                "{} wave {} verification: {} missing file(s), {} validation error(s)",
                style("warn").yellow(),
                verification.wave,
                verification.missing_files.len(),
                verification.validation_errors.len()
            );
        }
    }
}
