//! End-to-end executor scenarios over mock collaborators.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use aidf::domain::error::AidfError;
use aidf::domain::models::config::{Config, ProviderKind};
use aidf::domain::models::execution::{ExecutorStatus, TerminationReason};
use aidf::services::executor::{Executor, ExecutorOptions};

use common::{
    provider_result, seed_project, task_markdown, test_deps, CannedResponse, MockGit,
    MockProvider, ScriptedCall,
};

fn base_config() -> Config {
    let mut config = Config::default();
    config.execution.max_iterations = 5;
    config.auto_commit = true;
    config
}

fn executor_for(
    root: &TempDir,
    config: Config,
    provider: Arc<MockProvider>,
    git: Arc<MockGit>,
) -> Executor {
    Executor::new(
        config,
        ExecutorOptions::default(),
        test_deps(provider, git),
        root.path().to_path_buf(),
        std::path::PathBuf::from(".ai/tasks/pending/042-add-cache.md"),
    )
}

/// Scenario: happy path. One iteration, completion signal, validation
/// passes, file committed, task moved to completed/.
#[tokio::test]
async fn test_happy_path_single_task() {
    let root = TempDir::new().unwrap();
    seed_project(
        root.path(),
        "042-add-cache.md",
        &task_markdown("042", "Add cache", &["src/**"], &[".env*"]),
    );

    let mut config = base_config();
    config.validation.pre_commit = vec!["echo ok".into()];

    let provider = Arc::new(MockProvider::new(vec![ScriptedCall::ok(provider_result(
        "done\n<TASK_COMPLETE>",
        &["src/new.ts"],
    ))]));
    let git = Arc::new(MockGit::default());

    let result = executor_for(&root, config, Arc::clone(&provider), Arc::clone(&git))
        .run()
        .await;

    assert_eq!(result.status, ExecutorStatus::Completed);
    assert_eq!(result.termination, TerminationReason::Completed);
    assert_eq!(result.iteration, 1);
    assert_eq!(result.files_modified, vec!["src/new.ts".to_string()]);
    assert_eq!(provider.call_count(), 1);

    // Exactly one commit, prefixed with the configured commit prefix.
    let commits = git.commit_messages();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0], "aidf: Add cache");

    // The task file moved from pending/ to completed/ with a status section.
    assert!(!root
        .path()
        .join(".ai/tasks/pending/042-add-cache.md")
        .exists());
    let moved = root.path().join(".ai/tasks/completed/042-add-cache.md");
    let content = std::fs::read_to_string(moved).unwrap();
    assert!(content.contains("## Status: COMPLETED"));
    assert!(content.contains("- Iterations: 1"));
    assert!(content.contains("src/new.ts"));
}

/// Scenario: scope violation then recovery. Out-of-scope change is
/// reverted and counted; the next iteration completes cleanly.
#[tokio::test]
async fn test_scope_violation_then_recovery() {
    let root = TempDir::new().unwrap();
    seed_project(
        root.path(),
        "042-add-cache.md",
        &task_markdown("042", "Add cache", &["src/**"], &["config/**"]),
    );

    let provider = Arc::new(MockProvider::new(vec![
        ScriptedCall::ok(provider_result("touched config", &["config/secret.ts"])),
        ScriptedCall::ok(provider_result("fixed\n<TASK_COMPLETE>", &["src/ok.ts"])),
    ]));
    let git = Arc::new(MockGit::default());

    let result = executor_for(&root, base_config(), provider, Arc::clone(&git))
        .run()
        .await;

    assert_eq!(result.status, ExecutorStatus::Completed);
    assert_eq!(result.files_modified, vec!["src/ok.ts".to_string()]);
    assert_eq!(git.reverted_paths(), vec!["config/secret.ts".to_string()]);
    // Nothing under config/ was ever staged.
    for staged in git.staged.lock().unwrap().iter().flatten() {
        assert!(!staged.starts_with("config/"), "staged {staged}");
    }
}

/// Scenario: validation failure loop. The completion signal is demoted
/// until consecutive failures block the task.
#[tokio::test]
async fn test_validation_failure_loop_blocks() {
    let root = TempDir::new().unwrap();
    seed_project(
        root.path(),
        "042-add-cache.md",
        &task_markdown("042", "Add cache", &["src/**"], &[]),
    );

    let mut config = base_config();
    config.execution.max_iterations = 10;
    config.validation.pre_commit = vec!["echo failing-check; exit 1".into()];

    let provider = Arc::new(
        MockProvider::new(vec![]).with_default(provider_result(
            "claims done\n<TASK_COMPLETE>",
            &["src/a.ts"],
        )),
    );
    let git = Arc::new(MockGit::default());

    let result = executor_for(&root, config, provider, git).run().await;

    assert_eq!(result.status, ExecutorStatus::Blocked);
    assert_eq!(result.termination, TerminationReason::MaxFailures);
    let err = result.error.expect("last error recorded");
    assert_eq!(err.category().as_str(), "validation");

    // Moved to blocked/ with a breadcrumb carrying the failing output.
    let moved = root.path().join(".ai/tasks/blocked/042-add-cache.md");
    let content = std::fs::read_to_string(moved).unwrap();
    assert!(content.contains("## Status: BLOCKED"));
    assert!(content.contains("- Blocked breadcrumb: "));
    assert!(content.contains("failing-check"));
}

/// Scenario: rate limit transparency. The HTTP provider absorbs two 429s
/// internally; the executor sees one clean call.
#[tokio::test]
async fn test_rate_limit_transparency() {
    use aidf::infrastructure::providers::anthropic::AnthropicProvider;
    use aidf::infrastructure::providers::tools::ToolHandler;
    use aidf::services::scope_guard::ScopeGuard;
    use aidf::services::secret_scanner::SecretScanner;

    let root = TempDir::new().unwrap();
    seed_project(
        root.path(),
        "042-add-cache.md",
        &task_markdown("042", "Add cache", &["src/**"], &[]),
    );

    let success_body = serde_json::json!({
        "content": [{ "type": "text", "text": "done\n<TASK_COMPLETE>" }],
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 10, "output_tokens": 5 }
    })
    .to_string();
    let base_url = common::serve_sequence(vec![
        CannedResponse::new(429, "{}").header("retry-after", "0"),
        CannedResponse::new(429, "{}").header("retry-after", "0"),
        CannedResponse::new(200, &success_body),
    ])
    .await;

    let mut config = base_config();
    config.provider.kind = ProviderKind::HttpAnthropic;
    config.provider.api_key = Some("test-key".into());
    config.provider.base_url = Some(base_url);
    config.rate_limit.base_delay_ms = 1;
    config.rate_limit.max_delay_ms = 10;

    let task = aidf::domain::models::task::TaskScope {
        allowed: vec!["src/**".into()],
        ..Default::default()
    };
    let guard = Arc::new(ScopeGuard::new(&task, config.scope_enforcement).unwrap());
    let scanner = Arc::new(SecretScanner::new(config.secrets.clone()));
    let tools = Arc::new(ToolHandler::new(
        root.path().to_path_buf(),
        guard,
        scanner,
    ));
    let provider = Arc::new(AnthropicProvider::new(&config, tools).unwrap());

    let retries = Arc::new(AtomicUsize::new(0));
    let retries_seen = Arc::clone(&retries);

    let git = Arc::new(MockGit::default());
    let mut deps = test_deps(provider, git);
    deps.on_retry = Some(Arc::new(move |_attempt, _delay, _msg| {
        retries_seen.fetch_add(1, Ordering::SeqCst);
    }));

    let mut executor = Executor::new(
        config,
        ExecutorOptions::default(),
        deps,
        root.path().to_path_buf(),
        std::path::PathBuf::from(".ai/tasks/pending/042-add-cache.md"),
    );
    let result = executor.run().await;

    assert_eq!(result.status, ExecutorStatus::Completed, "{:?}", result.error);
    assert_eq!(result.iteration, 1);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
    // Rate limits never count as failures.
    assert!(result.error.is_none());
    assert!(!result.token_usage.estimated);
    assert_eq!(result.token_usage.input_tokens, 10);
}

/// Boundary: `max_iterations=0` with `--dry-run` does exactly one pass and
/// never calls the provider.
#[tokio::test]
async fn test_dry_run_with_zero_iterations() {
    let root = TempDir::new().unwrap();
    seed_project(
        root.path(),
        "042-add-cache.md",
        &task_markdown("042", "Add cache", &["src/**"], &[]),
    );

    let mut config = base_config();
    config.execution.max_iterations = 0;

    let provider = Arc::new(MockProvider::new(vec![]));
    let git = Arc::new(MockGit::default());
    let mut executor = Executor::new(
        config,
        ExecutorOptions {
            dry_run: true,
            ..Default::default()
        },
        test_deps(
            Arc::clone(&provider) as Arc<dyn aidf::domain::ports::Provider>,
            git,
        ),
        root.path().to_path_buf(),
        std::path::PathBuf::from(".ai/tasks/pending/042-add-cache.md"),
    );

    let result = executor.run().await;
    assert_eq!(result.termination, TerminationReason::DryRun);
    assert_eq!(provider.call_count(), 0);
    // Dry runs leave the task file untouched.
    assert!(root
        .path()
        .join(".ai/tasks/pending/042-add-cache.md")
        .exists());
}

/// Boundary: a zero token budget never triggers; a tiny one blocks.
#[tokio::test]
async fn test_token_budget_boundaries() {
    let root = TempDir::new().unwrap();
    seed_project(
        root.path(),
        "042-add-cache.md",
        &task_markdown("042", "Add cache", &["src/**"], &[]),
    );

    // Budget 0: unlimited.
    let provider = Arc::new(MockProvider::new(vec![ScriptedCall::ok(provider_result(
        "done\n<TASK_COMPLETE>",
        &[],
    ))]));
    let git = Arc::new(MockGit::default());
    let result = executor_for(&root, base_config(), provider, git).run().await;
    assert_eq!(result.status, ExecutorStatus::Completed);

    // Budget 10: the first iteration's 150 tokens exceed it.
    seed_project(
        root.path(),
        "043-other.md",
        &task_markdown("043", "Other", &["src/**"], &[]),
    );
    let mut config = base_config();
    config.rate_limit.token_budget = 10;
    let provider = Arc::new(MockProvider::new(vec![ScriptedCall::ok(provider_result(
        "keep going",
        &[],
    ))]));
    let git = Arc::new(MockGit::default());
    let mut executor = Executor::new(
        config,
        ExecutorOptions::default(),
        test_deps(provider, git),
        root.path().to_path_buf(),
        std::path::PathBuf::from(".ai/tasks/pending/043-other.md"),
    );
    let result = executor.run().await;
    assert_eq!(result.status, ExecutorStatus::Blocked);
    assert_eq!(result.termination, TerminationReason::BudgetExceeded);
}

/// A provider that reports NOT_AVAILABLE aborts immediately.
#[tokio::test]
async fn test_provider_unavailable_aborts() {
    let root = TempDir::new().unwrap();
    seed_project(
        root.path(),
        "042-add-cache.md",
        &task_markdown("042", "Add cache", &["src/**"], &[]),
    );

    let provider = Arc::new(MockProvider::new(vec![ScriptedCall::err(
        AidfError::provider(
            aidf::domain::error::ProviderCode::NotAvailable,
            "claude CLI not found",
        ),
    )]));
    let git = Arc::new(MockGit::default());
    let result = executor_for(&root, base_config(), Arc::clone(&provider), git)
        .run()
        .await;

    assert_eq!(result.status, ExecutorStatus::Failed);
    assert_eq!(provider.call_count(), 1);
    assert_eq!(result.error.unwrap().code_str(), "NOT_AVAILABLE");
    assert!(root
        .path()
        .join(".ai/tasks/failed/042-add-cache.md")
        .exists());
}

/// A blocked signal writes a resumable breadcrumb and resume restores it.
#[tokio::test]
async fn test_blocked_signal_then_resume() {
    let root = TempDir::new().unwrap();
    seed_project(
        root.path(),
        "042-add-cache.md",
        &task_markdown("042", "Add cache", &["src/**"], &[]),
    );

    let provider = Arc::new(MockProvider::new(vec![ScriptedCall::ok(provider_result(
        "cannot continue <TASK_BLOCKED: missing schema docs>",
        &["src/partial.ts"],
    ))]));
    let git = Arc::new(MockGit::default());
    let result = executor_for(&root, base_config(), provider, Arc::clone(&git))
        .run()
        .await;

    assert_eq!(result.status, ExecutorStatus::Blocked);
    assert_eq!(result.termination, TerminationReason::Blocked);

    // Resume picks the breadcrumb up from blocked/.
    let blocked_path = root.path().join(".ai/tasks/blocked/042-add-cache.md");
    assert!(blocked_path.exists());

    let provider = Arc::new(MockProvider::new(vec![ScriptedCall::ok(provider_result(
        "done\n<TASK_COMPLETE>",
        &["src/rest.ts"],
    ))]));
    let git = Arc::new(MockGit::default());
    let mut executor = Executor::new(
        base_config(),
        ExecutorOptions {
            resume: true,
            ..Default::default()
        },
        test_deps(provider, git),
        root.path().to_path_buf(),
        blocked_path,
    );
    let result = executor.run().await;

    assert_eq!(result.status, ExecutorStatus::Completed, "{:?}", result.error);
    // Iteration count continues from the breadcrumb.
    assert_eq!(result.iteration, 2);
    // The union keeps the earlier iteration's file.
    assert!(result.files_modified.contains(&"src/partial.ts".to_string()));
    assert!(result.files_modified.contains(&"src/rest.ts".to_string()));
}
