//! `aidf status` — task counts, optionally with report aggregates.

use anyhow::Result;

use crate::cli::output;
use crate::domain::models::task::TaskFileState;
use crate::services::context_loader::ContextLoader;

use super::workspace;

pub async fn handle_status(report: bool) -> Result<bool> {
    let (root, _config) = workspace()?;
    let loader = ContextLoader::new(&root)?;
    let index = loader.load_task_index()?;

    let counts: Vec<(&str, usize)> = TaskFileState::ALL
        .iter()
        .map(|state| {
            (
                state.dir_name(),
                index.values().filter(|e| e.state == *state).count(),
            )
        })
        .collect();
    println!("{}", output::status_table(&counts));

    if report {
        let (runs, input, output_tokens, cost) = aggregate_reports(&root);
        println!(
            "last {runs} run(s): {input} in / {output_tokens} out tokens, ~${cost:.4}"
        );
    }
    Ok(true)
}

/// Sum tokens and cost over the most recent run reports.
fn aggregate_reports(root: &std::path::Path) -> (usize, u64, u64, f64) {
    let reports_dir = root.join(".ai").join("reports");
    let mut files: Vec<std::path::PathBuf> = walk_json(&reports_dir);
    files.sort();
    let recent = files.iter().rev().take(10);

    let mut runs = 0usize;
    let (mut input, mut output, mut cost) = (0u64, 0u64, 0f64);
    for path in recent {
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        let Ok(report) =
            serde_json::from_str::<crate::domain::models::report::ExecutionReport>(&content)
        else {
            continue;
        };
        runs += 1;
        input += report.tokens.input;
        output += report.tokens.output;
        cost += report.cost.estimated_usd;
    }
    (runs, input, output, cost)
}

fn walk_json(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk_json(&path));
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(path);
        }
    }
    out
}
