//! Shared fixtures: a `.ai/` tree builder, a scriptable provider, a
//! recording git client, and a sequenced HTTP responder.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use aidf::domain::error::{AidfError, AidfResult};
use aidf::domain::models::execution::ExecutionResult;
use aidf::domain::models::task::FileChange;
use aidf::domain::ports::{ExecuteOptions, GitClient, Provider};
use aidf::infrastructure::notify::LogNotifier;
use aidf::services::executor::ExecutorDeps;

/// Write a file under the project root, creating parents.
pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Minimal `.ai/` tree with one pending task.
pub fn seed_project(root: &Path, task_file: &str, task_content: &str) {
    write(root, ".ai/AGENTS.md", "# Project\nFixture project.\n");
    write(root, &format!(".ai/tasks/pending/{task_file}"), task_content);
}

/// A task file with the given scope lists.
pub fn task_markdown(id: &str, title: &str, allowed: &[&str], forbidden: &[&str]) -> String {
    let mut fm = format!("---\nid: \"{id}\"\ntitle: {title}\nscope:\n  allowed:\n");
    for glob in allowed {
        fm.push_str(&format!("    - \"{glob}\"\n"));
    }
    if !forbidden.is_empty() {
        fm.push_str("  forbidden:\n");
        for glob in forbidden {
            fm.push_str(&format!("    - \"{glob}\"\n"));
        }
    }
    fm.push_str("---\n\n");
    format!(
        "{fm}# {title}\n\n## Goal\n\nDo the thing.\n\n## Requirements\n\n- works\n\n## Definition of Done\n\n- done\n"
    )
}

/// One scripted provider call.
pub struct ScriptedCall {
    pub result: AidfResult<ExecutionResult>,
    pub delay_ms: u64,
    pub barrier: Option<Arc<tokio::sync::Barrier>>,
}

impl ScriptedCall {
    pub fn ok(result: ExecutionResult) -> Self {
        Self {
            result: Ok(result),
            delay_ms: 0,
            barrier: None,
        }
    }

    pub fn err(err: AidfError) -> Self {
        Self {
            result: Err(err),
            delay_ms: 0,
            barrier: None,
        }
    }
}

/// A provider that replays a script, then repeats an optional default.
pub struct MockProvider {
    script: Mutex<VecDeque<ScriptedCall>>,
    default: Option<ExecutionResult>,
    pub calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(script: Vec<ScriptedCall>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            default: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_default(mut self, default: ExecutionResult) -> Self {
        self.default = Some(default);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Build a successful result: output text + changed paths.
pub fn provider_result(output: &str, files: &[&str]) -> ExecutionResult {
    ExecutionResult {
        completion_signal: aidf::domain::models::execution::CompletionSignal::parse(output),
        output: output.to_string(),
        files_changed: files.iter().map(|f| FileChange::modified(*f)).collect(),
        token_usage: Some(aidf::domain::models::execution::TokenUsage::estimated(
            100, 50,
        )),
        conversation_metrics: None,
        conversation_state: None,
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn execute(&self, _prompt: &str, _opts: &ExecuteOptions) -> AidfResult<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let call = self.script.lock().unwrap().pop_front();
        match call {
            Some(call) => {
                if let Some(barrier) = &call.barrier {
                    barrier.wait().await;
                }
                if call.delay_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(call.delay_ms)).await;
                }
                call.result
            }
            None => match &self.default {
                Some(default) => Ok(default.clone()),
                None => Err(AidfError::provider(
                    aidf::domain::error::ProviderCode::Crash,
                    "mock script exhausted",
                )),
            },
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn supports_session_continuation(&self) -> bool {
        false
    }
}

/// Records git interactions; never touches a real repository.
#[derive(Default)]
pub struct MockGit {
    pub staged: Mutex<Vec<Vec<String>>>,
    pub commits: Mutex<Vec<String>>,
    pub reverted: Mutex<Vec<String>>,
    pub pushes: AtomicUsize,
}

impl MockGit {
    pub fn commit_messages(&self) -> Vec<String> {
        self.commits.lock().unwrap().clone()
    }

    pub fn reverted_paths(&self) -> Vec<String> {
        self.reverted.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitClient for MockGit {
    async fn is_repo(&self) -> bool {
        true
    }

    async fn changed_files(&self) -> AidfResult<Vec<FileChange>> {
        Ok(vec![])
    }

    async fn stage(&self, paths: &[String]) -> AidfResult<()> {
        self.staged.lock().unwrap().push(paths.to_vec());
        Ok(())
    }

    async fn commit(&self, message: &str) -> AidfResult<()> {
        self.commits.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn push(&self) -> AidfResult<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn revert_paths(&self, paths: &[String]) -> AidfResult<()> {
        self.reverted.lock().unwrap().extend_from_slice(paths);
        Ok(())
    }

    async fn current_branch(&self) -> AidfResult<String> {
        Ok("main".to_string())
    }
}

/// Deps bundle around a mock provider and mock git.
pub fn test_deps(provider: Arc<dyn Provider>, git: Arc<MockGit>) -> ExecutorDeps {
    ExecutorDeps {
        git,
        notifier: Arc::new(LogNotifier),
        approver: None,
        provider_factory: Arc::new(move |_, _, _, _, _| Ok(Arc::clone(&provider))),
        claims: None,
        cancel: CancellationToken::new(),
        on_output: None,
        on_retry: None,
    }
}

/// Serve a fixed sequence of raw HTTP/1.1 responses on a local port, one
/// per connection, then keep repeating the last one.
pub struct CannedResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl CannedResponse {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![],
            body: body.to_string(),
        }
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }
}

pub async fn serve_sequence(responses: Vec<CannedResponse>) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let responses = Arc::new(responses);
    let served = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let idx = served.fetch_add(1, Ordering::SeqCst);
            let responses = Arc::clone(&responses);
            tokio::spawn(async move {
                // Drain the request fully (headers + content-length body) so
                // the client is never mid-send when the response lands.
                let mut received = Vec::new();
                let mut buf = vec![0u8; 16384];
                loop {
                    let Ok(n) = socket.read(&mut buf).await else {
                        break;
                    };
                    if n == 0 {
                        break;
                    }
                    received.extend_from_slice(&buf[..n]);
                    if let Some(head_end) =
                        received.windows(4).position(|w| w == b"\r\n\r\n")
                    {
                        let head = String::from_utf8_lossy(&received[..head_end]);
                        let content_length: usize = head
                            .lines()
                            .find_map(|l| {
                                l.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse().unwrap_or(0))
                            })
                            .unwrap_or(0);
                        if received.len() >= head_end + 4 + content_length {
                            break;
                        }
                    }
                }

                let response = &responses[idx.min(responses.len() - 1)];
                let reason = match response.status {
                    200 => "OK",
                    429 => "Too Many Requests",
                    _ => "Status",
                };
                let mut head = format!("HTTP/1.1 {} {reason}\r\n", response.status);
                for (name, value) in &response.headers {
                    head.push_str(&format!("{name}: {value}\r\n"));
                }
                head.push_str(&format!(
                    "content-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    response.body.len()
                ));
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(response.body.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}
