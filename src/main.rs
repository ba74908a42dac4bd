//! aidf CLI entry point.

use anyhow::Result;
use clap::Parser;

use aidf::cli::{commands, Cli, Commands, PlanCommands};
use aidf::infrastructure::logging::init_logging;
use aidf::services::context_loader::discover_project_root;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging wants the project's config when one exists; fall back to
    // defaults so discovery failures are still reported through tracing.
    let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());
    let root = discover_project_root(&cwd);
    let logging_config = root
        .as_ref()
        .and_then(|r| {
            aidf::infrastructure::config::ConfigLoader::load(&r.join(".ai"))
                .ok()
                .map(|c| c.logging)
        })
        .unwrap_or_default();
    let ai_root = root
        .map(|r| r.join(".ai"))
        .unwrap_or_else(|| cwd.join(".ai"));
    let _log_guard = init_logging(&logging_config, &ai_root, cli.verbose);

    let success = match cli.command {
        Commands::Run {
            task_path,
            resume,
            dry_run,
            profile,
        } => commands::run::handle_run(task_path, resume, dry_run, profile).await?,
        Commands::Plan {
            command:
                PlanCommands::Run {
                    plan_path,
                    concurrency,
                    continue_on_error,
                    dry_run,
                },
        } => {
            commands::plan::handle_plan_run(plan_path, concurrency, continue_on_error, dry_run)
                .await?
        }
        Commands::Quick {
            description,
            full,
            max_iterations,
        } => commands::quick::handle_quick(description, full, max_iterations).await?,
        Commands::Status { report } => commands::status::handle_status(report).await?,
        Commands::Verify {
            task_path,
            scan_only,
        } => commands::verify::handle_verify(task_path, scan_only).await?,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
