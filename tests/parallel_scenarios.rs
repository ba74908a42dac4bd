//! Parallel executor scenarios: conflict serialization, dependency gating,
//! plan idempotence.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use aidf::domain::models::config::Config;
use aidf::services::executor::ExecutorDeps;
use aidf::services::parallel::{ParallelExecutor, ParallelOptions};

use common::{provider_result, task_markdown, test_deps, write, MockGit, MockProvider, ScriptedCall};

fn seed_plan_project(root: &std::path::Path, tasks: &[(&str, String)], plan_entries: &[&str]) {
    write(root, ".ai/AGENTS.md", "# Project\nFixture.\n");
    for (file, content) in tasks {
        write(root, &format!(".ai/tasks/pending/{file}"), content);
    }
    let mut plan = String::from("---\ntitle: Fixture plan\nstatus: active\n---\n\n## Tasks\n\n");
    for entry in plan_entries {
        plan.push_str(entry);
        plan.push('\n');
    }
    write(root, ".ai/plans/fixture.md", &plan);
}

/// Factory that hands out pre-built providers in creation order.
fn pooled_deps_factory(
    providers: Vec<Arc<MockProvider>>,
    git: Arc<MockGit>,
) -> (Arc<dyn Fn() -> ExecutorDeps + Send + Sync>, Arc<AtomicUsize>) {
    let pool = Arc::new(Mutex::new(std::collections::VecDeque::from(providers)));
    let count = Arc::new(AtomicUsize::new(0));
    let count_inner = Arc::clone(&count);
    let factory = Arc::new(move || {
        count_inner.fetch_add(1, Ordering::SeqCst);
        let provider: Arc<dyn aidf::domain::ports::Provider> = pool
            .lock()
            .unwrap()
            .pop_front()
            .expect("provider pool exhausted");
        test_deps(provider, Arc::clone(&git))
    });
    (factory, count)
}

fn base_config() -> Config {
    let mut config = Config::default();
    config.execution.max_iterations = 3;
    config
}

/// Scenario: two tasks sharing an allowed scope both run in wave 1; the
/// claim loser is cancelled, re-enqueued, and completes serialized.
#[tokio::test]
async fn test_parallel_conflict_serialization() {
    let root = TempDir::new().unwrap();
    seed_plan_project(
        root.path(),
        &[
            (
                "a-shared.md",
                task_markdown("a-shared", "Task A", &["src/shared/**"], &[]),
            ),
            (
                "b-shared.md",
                task_markdown("b-shared", "Task B", &["src/shared/**"], &[]),
            ),
        ],
        &[
            "- [ ] `tasks/pending/a-shared.md` — task a",
            "- [ ] `tasks/pending/b-shared.md` — task b",
        ],
    );

    // Both providers rendezvous, then B returns immediately while A lags;
    // B claims src/shared/util.ts first and holds it through a slow
    // validation, so A's claim collides.
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let slow_a = Arc::new(MockProvider::new(vec![
        ScriptedCall {
            result: Ok(provider_result("a done\n<TASK_COMPLETE>", &["src/shared/util.ts"])),
            delay_ms: 150,
            barrier: Some(Arc::clone(&barrier)),
        },
    ]));
    let fast_b = Arc::new(MockProvider::new(vec![ScriptedCall {
        result: Ok(provider_result("b done\n<TASK_COMPLETE>", &["src/shared/util.ts"])),
        delay_ms: 0,
        barrier: Some(barrier),
    }]));
    let retry_a = Arc::new(MockProvider::new(vec![ScriptedCall::ok(provider_result(
        "a retried\n<TASK_COMPLETE>",
        &["src/shared/util.ts"],
    ))]));

    let mut config = base_config();
    // Hold B's claim long enough for A's late claim to collide.
    config.validation.pre_commit = vec!["sleep 0.4".into()];

    let git = Arc::new(MockGit::default());
    let (factory, _count) = pooled_deps_factory(
        vec![Arc::clone(&slow_a), fast_b, retry_a],
        Arc::clone(&git),
    );

    let executor = ParallelExecutor::new(
        config,
        ParallelOptions::default(),
        root.path().to_path_buf(),
        factory,
    );
    let result = executor
        .run(std::path::Path::new("plans/fixture.md"))
        .await
        .unwrap();

    assert!(result.success, "failed: {:?}", result.failed);
    assert_eq!(result.completed.len(), 2);
    assert_eq!(
        result.file_conflicts,
        vec!["src/shared/util.ts".to_string()]
    );
    // Two wave admissions plus one serialized re-run.
    assert_eq!(result.per_task.len(), 2);
}

/// Scenario: a dependency on a task that exists but is not completed stops
/// the whole plan before anything runs.
#[tokio::test]
async fn test_unmet_external_dependency_fails_plan() {
    let root = TempDir::new().unwrap();
    // Task 080 exists but is still pending.
    write(
        root.path(),
        ".ai/tasks/pending/080-prereq.md",
        &task_markdown("080", "Prereq", &["src/**"], &[]),
    );
    seed_plan_project(
        root.path(),
        &[(
            "x-dependent.md",
            "---\nid: x\ntitle: X\ndepends_on:\n  - \"080\"\nscope:\n  allowed:\n    - \"src/**\"\n---\n\n## Goal\nx\n".to_string(),
        )],
        &["- [ ] `tasks/pending/x-dependent.md` — dependent"],
    );

    let git = Arc::new(MockGit::default());
    let (factory, count) = pooled_deps_factory(vec![], Arc::clone(&git));
    let executor = ParallelExecutor::new(
        base_config(),
        ParallelOptions::default(),
        root.path().to_path_buf(),
        factory,
    );
    let err = executor
        .run(std::path::Path::new("plans/fixture.md"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("depends on 080"));
    assert!(err.to_string().contains("not completed"));
    // No executor ever started.
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

/// The same dependency is satisfied once 080 is in completed/.
#[tokio::test]
async fn test_completed_external_dependency_passes() {
    let root = TempDir::new().unwrap();
    write(
        root.path(),
        ".ai/tasks/completed/080-prereq.md",
        &task_markdown("080", "Prereq", &["src/**"], &[]),
    );
    seed_plan_project(
        root.path(),
        &[(
            "x-dependent.md",
            "---\nid: x\ntitle: X\ndepends_on:\n  - \"080\"\nscope:\n  allowed:\n    - \"src/**\"\n---\n\n## Goal\nx\n".to_string(),
        )],
        &["- [ ] `tasks/pending/x-dependent.md` — dependent"],
    );

    let provider = Arc::new(MockProvider::new(vec![ScriptedCall::ok(provider_result(
        "done\n<TASK_COMPLETE>",
        &["src/x.rs"],
    ))]));
    let git = Arc::new(MockGit::default());
    let (factory, _count) = pooled_deps_factory(vec![provider], git);
    let executor = ParallelExecutor::new(
        base_config(),
        ParallelOptions::default(),
        root.path().to_path_buf(),
        factory,
    );
    let result = executor
        .run(std::path::Path::new("plans/fixture.md"))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.completed.len(), 1);
}

/// Dependent tasks run in later waves and receive the earlier wave's
/// summaries.
#[tokio::test]
async fn test_waves_follow_dependencies() {
    let root = TempDir::new().unwrap();
    seed_plan_project(
        root.path(),
        &[
            (
                "base.md",
                task_markdown("base", "Base layer", &["src/base/**"], &[]),
            ),
            (
                "top.md",
                "---\nid: top\ntitle: Top layer\ndepends_on:\n  - base\nscope:\n  allowed:\n    - \"src/top/**\"\n---\n\n## Goal\nbuild on base\n".to_string(),
            ),
        ],
        &[
            "- [ ] `tasks/pending/base.md` — base",
            "- [ ] `tasks/pending/top.md` — top",
        ],
    );

    let first = Arc::new(MockProvider::new(vec![ScriptedCall::ok(provider_result(
        "base done\n<TASK_COMPLETE>",
        &["src/base/mod.rs"],
    ))]));
    let second = Arc::new(MockProvider::new(vec![ScriptedCall::ok(provider_result(
        "top done\n<TASK_COMPLETE>",
        &["src/top/mod.rs"],
    ))]));
    let git = Arc::new(MockGit::default());
    let (factory, _count) =
        pooled_deps_factory(vec![Arc::clone(&first), Arc::clone(&second)], git);

    let executor = ParallelExecutor::new(
        base_config(),
        ParallelOptions::default(),
        root.path().to_path_buf(),
        factory,
    );
    let result = executor
        .run(std::path::Path::new("plans/fixture.md"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.completed.len(), 2);
    // Both providers ran exactly once, in wave order.
    assert_eq!(first.call_count(), 1);
    assert_eq!(second.call_count(), 1);
    assert_eq!(result.wave_verifications.len(), 2);
}

/// Idempotence: re-invoking a plan after completion executes nothing.
#[tokio::test]
async fn test_plan_rerun_is_idempotent() {
    let root = TempDir::new().unwrap();
    seed_plan_project(
        root.path(),
        &[(
            "solo.md",
            task_markdown("solo", "Solo task", &["src/**"], &[]),
        )],
        &["- [ ] `tasks/pending/solo.md` — solo"],
    );

    let provider = Arc::new(MockProvider::new(vec![ScriptedCall::ok(provider_result(
        "done\n<TASK_COMPLETE>",
        &["src/solo.rs"],
    ))]));
    let git = Arc::new(MockGit::default());
    let (factory, count) = pooled_deps_factory(vec![provider], Arc::clone(&git));
    let executor = ParallelExecutor::new(
        base_config(),
        ParallelOptions::default(),
        root.path().to_path_buf(),
        factory,
    );

    let result = executor
        .run(std::path::Path::new("plans/fixture.md"))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // The checkbox was rewritten in place.
    let plan = std::fs::read_to_string(root.path().join(".ai/plans/fixture.md")).unwrap();
    assert!(plan.contains("- [x] `tasks/pending/solo.md`"));

    // Second invocation: nothing left to run, factory untouched.
    let (factory, count2) = pooled_deps_factory(vec![], git);
    let executor = ParallelExecutor::new(
        base_config(),
        ParallelOptions::default(),
        root.path().to_path_buf(),
        factory,
    );
    let result = executor
        .run(std::path::Path::new("plans/fixture.md"))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(count2.load(Ordering::SeqCst), 0);
    assert_eq!(result.skipped.len(), 1);
}
