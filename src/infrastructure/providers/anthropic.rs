//! Anthropic Messages API provider with an internal tool-call loop.
//!
//! Each round posts the (window-trimmed) message array plus the fixed tool
//! schema. Tool calls execute through the bound [`ToolHandler`]; the loop
//! ends when the model stops requesting tools or signals completion. Only
//! the outer HTTP call is retried, never the enclosing tool loop.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::error::{AidfError, AidfResult, ProviderCode};
use crate::domain::models::config::{Config, ProviderKind};
use crate::domain::models::execution::{CompletionSignal, ExecutionResult, TokenUsage};
use crate::domain::ports::{ExecuteOptions, Provider};
use crate::services::conversation_window::{ConversationWindow, Message};
use crate::services::dedup_cache::DedupCache;
use crate::services::retry::{RetryDecision, RetryPolicy};

use super::http::{error_from_response, error_from_transport};
use super::tools::{tool_schemas, ToolHandler};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8_192;
/// Upper bound on tool rounds per execute() call.
const MAX_TOOL_ROUNDS: usize = 25;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
    window: Mutex<ConversationWindow>,
    dedup: Mutex<DedupCache>,
    tools: Arc<ToolHandler>,
}

impl AnthropicProvider {
    pub fn new(config: &Config, tools: Arc<ToolHandler>) -> AidfResult<Self> {
        let api_key = config
            .provider
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                AidfError::config(
                    crate::domain::error::ConfigCode::Missing,
                    "http-anthropic requires provider.api_key or ANTHROPIC_API_KEY",
                )
            })?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: config
                .provider
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: config
                .provider
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            retry: RetryPolicy::from_config(&config.rate_limit),
            window: Mutex::new(ConversationWindow::new(config.conversation.clone())),
            dedup: Mutex::new(DedupCache::new(config.rate_limit.dedup_window_ms)),
            tools,
        })
    }

    async fn post_messages(
        &self,
        messages: &[Message],
        opts: &ExecuteOptions,
    ) -> AidfResult<Value> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": messages,
            "tools": tool_schemas(),
        });
        let url = format!("{}/v1/messages", self.base_url);

        self.retry
            .execute(
                || {
                    let client = self.client.clone();
                    let url = url.clone();
                    let api_key = self.api_key.clone();
                    let body = body.clone();
                    async move {
                        let response = client
                            .post(&url)
                            .header("x-api-key", &api_key)
                            .header("anthropic-version", ANTHROPIC_VERSION)
                            .json(&body)
                            .send()
                            .await
                            .map_err(|e| error_from_transport(&e))?;

                        if !response.status().is_success() {
                            return Err(error_from_response(response).await);
                        }
                        response
                            .json::<Value>()
                            .await
                            .map_err(|e| error_from_transport(&e))
                    }
                },
                RetryDecision::from_error,
                opts.on_retry.as_ref(),
            )
            .await
    }

    fn usage_from(response: &Value) -> TokenUsage {
        let usage = &response["usage"];
        TokenUsage {
            input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
            estimated: false,
            cache_read: usage["cache_read_input_tokens"].as_u64(),
            cache_write: usage["cache_creation_input_tokens"].as_u64(),
        }
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    async fn execute(&self, prompt: &str, opts: &ExecuteOptions) -> AidfResult<ExecutionResult> {
        if let Some(cached) = self.dedup.lock().await.check(prompt) {
            debug!("identical prompt failed recently; short-circuiting");
            return Err(cached);
        }

        let mut messages: Vec<Message> = match &opts.conversation_state {
            Some(state) => serde_json::from_str(state).unwrap_or_default(),
            None => Vec::new(),
        };
        messages.push(Message::user(prompt));

        let mut output = String::new();
        let mut usage_total = TokenUsage::default();
        let mut signal: Option<CompletionSignal> = None;
        let mut last_metrics = None;

        for round in 0..MAX_TOOL_ROUNDS {
            let (trimmed, metrics) = self.window.lock().await.trim(messages).await;
            messages = trimmed;
            last_metrics = Some(metrics);

            let response = match self.post_messages(&messages, opts).await {
                Ok(response) => response,
                Err(err) => {
                    self.dedup.lock().await.record_failure(prompt, &err);
                    return Err(err);
                }
            };
            usage_total.add(&Self::usage_from(&response));

            let content = response["content"].as_array().cloned().unwrap_or_default();
            let mut tool_results: Vec<Value> = Vec::new();

            for block in &content {
                match block["type"].as_str() {
                    Some("text") => {
                        if let Some(text) = block["text"].as_str() {
                            if let Some(cb) = &opts.on_output {
                                cb(text);
                            }
                            output.push_str(text);
                            output.push('\n');
                        }
                    }
                    Some("tool_use") => {
                        let name = block["name"].as_str().unwrap_or_default();
                        let id = block["id"].as_str().unwrap_or_default();
                        let result = self.tools.handle(name, &block["input"]).await?;
                        if result.signal.is_some() {
                            signal = result.signal.clone();
                        }
                        tool_results.push(json!({
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": result.content,
                            "is_error": result.is_error,
                        }));
                    }
                    _ => {}
                }
            }

            messages.push(Message::new("assistant", Value::Array(content)));

            if tool_results.is_empty() || signal.is_some() {
                if !tool_results.is_empty() {
                    messages.push(Message::new("user", Value::Array(tool_results)));
                }
                break;
            }
            messages.push(Message::new("user", Value::Array(tool_results)));

            if round + 1 == MAX_TOOL_ROUNDS {
                warn!(rounds = MAX_TOOL_ROUNDS, "tool loop hit its round cap");
            }
        }

        if output.trim().is_empty() && signal.is_none() {
            return Err(AidfError::provider(
                ProviderCode::ApiError,
                "model returned neither text nor a completion signal",
            ));
        }

        Ok(ExecutionResult {
            completion_signal: signal.or_else(|| CompletionSignal::parse(&output)),
            files_changed: self.tools.take_changes(),
            token_usage: Some(usage_total),
            conversation_metrics: last_metrics,
            conversation_state: serde_json::to_string(&messages).ok(),
            output,
        })
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn name(&self) -> &str {
        ProviderKind::HttpAnthropic.as_str()
    }

    fn supports_session_continuation(&self) -> bool {
        true
    }
}
