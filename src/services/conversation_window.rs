//! Sliding-window trimming of multi-turn message history.
//!
//! Keeps the head (system/context seed) and tail intact and evicts the
//! oldest middle messages. Optionally condenses the evicted text into a
//! single synthetic assistant message via an injected summarizer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::domain::models::config::ConversationConfig;
use crate::domain::models::context::estimate_tokens;
use crate::domain::models::execution::WindowMetrics;
use crate::domain::ports::ConversationSummarizer;

/// Minimum evicted messages between summarizer invocations.
const SUMMARIZE_EVERY: usize = 10;

/// One conversation turn. Content is opaque: a plain string or a list of
/// provider-specific blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: Value,
}

impl Message {
    pub fn new(role: impl Into<String>, content: Value) -> Self {
        Self {
            role: role.into(),
            content,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new("system", Value::String(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new("user", Value::String(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new("assistant", Value::String(text.into()))
    }

    /// Flattened text of the content, used for estimates and summaries.
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }

    /// Whether this message carries anything beyond tool results.
    fn has_meaningful_content(&self) -> bool {
        match &self.content {
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(blocks) => blocks.iter().any(|b| {
                b.get("type").and_then(Value::as_str) != Some("tool_result")
            }),
            _ => true,
        }
    }
}

/// Provider-agnostic window trimmer. One instance lives per task run.
pub struct ConversationWindow {
    config: ConversationConfig,
    summarizer: Option<Arc<dyn ConversationSummarizer>>,
    evicted_since_summary: usize,
    warned_head_tail: bool,
}

impl ConversationWindow {
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            config,
            summarizer: None,
            evicted_since_summary: 0,
            warned_head_tail: false,
        }
    }

    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn ConversationSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Trim `messages` to the configured window.
    ///
    /// `preserved_messages` counts the returned list (including a synthetic
    /// summary message, when one is inserted); `evicted_messages` counts
    /// source messages dropped.
    pub async fn trim(&mut self, messages: Vec<Message>) -> (Vec<Message>, WindowMetrics) {
        let total = messages.len();
        let max = self.config.max_messages;

        if total <= max {
            let metrics = self.metrics(total, &messages, 0);
            return (messages, metrics);
        }

        let first_n = self.config.preserve_first_n.min(total);
        let last_n = self.config.preserve_last_n.min(total - first_n);

        if first_n + last_n >= max {
            if !self.warned_head_tail {
                warn!(
                    preserve_first_n = first_n,
                    preserve_last_n = last_n,
                    max_messages = max,
                    "head + tail preservation fills the whole window; middle is always evicted"
                );
                self.warned_head_tail = true;
            }
            let head = messages[..first_n].to_vec();
            let tail = messages[total - last_n..].to_vec();
            let evicted: Vec<Message> = messages[first_n..total - last_n].to_vec();
            let trimmed = self.assemble(head, Vec::new(), tail, &evicted).await;
            let metrics = self.metrics(total, &trimmed, evicted.len());
            return (trimmed, metrics);
        }

        let keep_middle = max - first_n - last_n;
        let middle = &messages[first_n..total - last_n];
        let evicted: Vec<Message> = middle[..middle.len() - keep_middle].to_vec();
        let kept_middle = middle[middle.len() - keep_middle..].to_vec();
        let head = messages[..first_n].to_vec();
        let tail = messages[total - last_n..].to_vec();

        let trimmed = self.assemble(head, kept_middle, tail, &evicted).await;
        let metrics = self.metrics(total, &trimmed, evicted.len());
        (trimmed, metrics)
    }

    async fn assemble(
        &mut self,
        head: Vec<Message>,
        kept_middle: Vec<Message>,
        tail: Vec<Message>,
        evicted: &[Message],
    ) -> Vec<Message> {
        self.evicted_since_summary += evicted.len();
        let summary = self.maybe_summarize(evicted).await;

        let mut out = head;
        if let Some(text) = summary {
            out.push(Message::assistant(format!("[Conversation Summary] {text}")));
            self.evicted_since_summary = 0;
        }
        out.extend(kept_middle);
        out.extend(tail);
        out
    }

    async fn maybe_summarize(&mut self, evicted: &[Message]) -> Option<String> {
        if !self.config.summarize_on_trim || evicted.is_empty() {
            return None;
        }
        if self.evicted_since_summary < SUMMARIZE_EVERY {
            return None;
        }
        if !evicted.iter().any(Message::has_meaningful_content) {
            return None;
        }
        let summarizer = self.summarizer.as_ref()?;
        let text: String = evicted
            .iter()
            .map(Message::text)
            .collect::<Vec<_>>()
            .join("\n");
        match summarizer.summarize(&text).await {
            Ok(summary) => Some(summary),
            Err(err) => {
                // Plain eviction is the fallback.
                warn!(error = %err, "conversation summarizer failed; evicting without summary");
                None
            }
        }
    }

    fn metrics(&self, total: usize, trimmed: &[Message], evicted: usize) -> WindowMetrics {
        let estimated_tokens = trimmed.iter().map(|m| estimate_tokens(&m.text())).sum();
        WindowMetrics {
            total_messages: total,
            preserved_messages: trimmed.len(),
            evicted_messages: evicted,
            estimated_tokens,
        }
    }
}
