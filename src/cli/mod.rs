//! Command-line interface definitions.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "aidf",
    version,
    about = "AI-assisted task execution engine",
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose logging (debug level).
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

/// Execution profile applied on top of the loaded config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// More iterations, no budget pressure.
    Quality,
    /// The configured defaults.
    Balanced,
    /// Fewer iterations and a tight token budget.
    Budget,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one task through the executor.
    Run {
        task_path: PathBuf,

        /// Resume a blocked task from its breadcrumb.
        #[arg(long)]
        resume: bool,

        /// Build the prompt and stop before calling the provider.
        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum)]
        profile: Option<Profile>,
    },

    /// Plan-level operations.
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },

    /// Run a one-shot task from a description, without authoring a file
    /// first.
    Quick {
        description: String,

        /// Use the full configured iteration budget instead of the
        /// quick-task cap.
        #[arg(long)]
        full: bool,

        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Summarize pending/completed/blocked/failed task counts.
    Status {
        /// Include token/cost aggregates from recent run reports.
        #[arg(long)]
        report: bool,
    },

    /// Post-hoc verification of one task: validation commands, scope check,
    /// secret scan.
    Verify {
        task_path: PathBuf,

        /// Only run the secret scanner.
        #[arg(long)]
        scan_only: bool,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Run a plan through the parallel executor.
    Run {
        plan_path: PathBuf,

        /// Maximum tasks running at once.
        #[arg(long, default_value_t = 3)]
        concurrency: usize,

        /// Keep scheduling later waves after a failed wave.
        #[arg(long)]
        continue_on_error: bool,

        #[arg(long)]
        dry_run: bool,
    },
}

/// Apply a profile's overrides to the loaded config.
pub fn apply_profile(config: &mut crate::domain::models::config::Config, profile: Profile) {
    match profile {
        Profile::Quality => {
            config.execution.max_iterations = config.execution.max_iterations.max(15);
            config.rate_limit.token_budget = 0;
        }
        Profile::Balanced => {}
        Profile::Budget => {
            config.execution.max_iterations = config.execution.max_iterations.min(5);
            if config.rate_limit.token_budget == 0 {
                config.rate_limit.token_budget = 200_000;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::Config;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["aidf", "run", "tasks/pending/042.md", "--resume"]);
        match cli.command {
            Commands::Run { task_path, resume, dry_run, .. } => {
                assert_eq!(task_path, PathBuf::from("tasks/pending/042.md"));
                assert!(resume);
                assert!(!dry_run);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_plan_run_with_concurrency() {
        let cli = Cli::parse_from(["aidf", "plan", "run", "plans/p.md", "--concurrency", "5"]);
        match cli.command {
            Commands::Plan {
                command: PlanCommands::Run { concurrency, .. },
            } => assert_eq!(concurrency, 5),
            _ => panic!("expected plan run"),
        }
    }

    #[test]
    fn test_profiles() {
        let mut config = Config::default();
        apply_profile(&mut config, Profile::Budget);
        assert_eq!(config.execution.max_iterations, 5);
        assert_eq!(config.rate_limit.token_budget, 200_000);

        let mut config = Config::default();
        apply_profile(&mut config, Profile::Quality);
        assert_eq!(config.execution.max_iterations, 15);
    }
}
