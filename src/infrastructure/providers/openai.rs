//! OpenAI Chat Completions provider with an internal tool-call loop.
//!
//! Mirrors the Anthropic provider's structure; only the wire shapes differ
//! (function-call tools, `role: "tool"` results, `usage.prompt_tokens`).

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

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o";
const MAX_TOOL_ROUNDS: usize = 25;

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
    window: Mutex<ConversationWindow>,
    dedup: Mutex<DedupCache>,
    tools: Arc<ToolHandler>,
}

impl OpenAiProvider {
    pub fn new(config: &Config, tools: Arc<ToolHandler>) -> AidfResult<Self> {
        let api_key = config
            .provider
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                AidfError::config(
                    crate::domain::error::ConfigCode::Missing,
                    "http-openai requires provider.api_key or OPENAI_API_KEY",
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

    /// The neutral tool schema rendered as OpenAI function definitions.
    fn function_schemas() -> Vec<Value> {
        tool_schemas()
            .into_iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t["name"],
                        "description": t["description"],
                        "parameters": t["input_schema"],
                    }
                })
            })
            .collect()
    }

    /// Chat Completions puts tool calls and tool-call ids at the message
    /// level, not inside `content`; splice stored object contents up.
    fn wire_message(message: &Message) -> Value {
        match &message.content {
            Value::Object(fields)
                if fields.contains_key("tool_calls") || fields.contains_key("tool_call_id") =>
            {
                let mut wire = serde_json::Map::new();
                wire.insert("role".to_string(), Value::String(message.role.clone()));
                for (key, value) in fields {
                    wire.insert(key.clone(), value.clone());
                }
                Value::Object(wire)
            }
            content => json!({ "role": message.role, "content": content }),
        }
    }

    async fn post_chat(&self, messages: &[Message], opts: &ExecuteOptions) -> AidfResult<Value> {
        let wire: Vec<Value> = messages.iter().map(Self::wire_message).collect();
        let body = json!({
            "model": self.model,
            "messages": wire,
            "tools": Self::function_schemas(),
        });
        let url = format!("{}/v1/chat/completions", self.base_url);

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
                            .bearer_auth(&api_key)
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
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            estimated: false,
            cache_read: None,
            cache_write: None,
        }
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
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

            let response = match self.post_chat(&messages, opts).await {
                Ok(response) => response,
                Err(err) => {
                    self.dedup.lock().await.record_failure(prompt, &err);
                    return Err(err);
                }
            };
            usage_total.add(&Self::usage_from(&response));

            let message = &response["choices"][0]["message"];
            if let Some(text) = message["content"].as_str() {
                if !text.is_empty() {
                    if let Some(cb) = &opts.on_output {
                        cb(text);
                    }
                    output.push_str(text);
                    output.push('\n');
                }
            }

            let tool_calls = message["tool_calls"].as_array().cloned().unwrap_or_default();
            // Echo the assistant turn (with its tool calls) into history.
            messages.push(Message::new(
                "assistant",
                json!({
                    "content": message["content"].clone(),
                    "tool_calls": tool_calls.clone(),
                }),
            ));

            if tool_calls.is_empty() {
                break;
            }

            for call in &tool_calls {
                let id = call["id"].as_str().unwrap_or_default();
                let name = call["function"]["name"].as_str().unwrap_or_default();
                let arguments: Value = call["function"]["arguments"]
                    .as_str()
                    .and_then(|a| serde_json::from_str(a).ok())
                    .unwrap_or_else(|| json!({}));
                let result = self.tools.handle(name, &arguments).await?;
                if result.signal.is_some() {
                    signal = result.signal.clone();
                }
                messages.push(Message::new(
                    "tool",
                    json!({
                        "tool_call_id": id,
                        "content": result.content,
                    }),
                ));
            }

            if signal.is_some() {
                break;
            }
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
        ProviderKind::HttpOpenai.as_str()
    }

    fn supports_session_continuation(&self) -> bool {
        true
    }
}
