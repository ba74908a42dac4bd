//! Short-TTL dedup of prompts that just failed non-retryably.
//!
//! Re-sending a prompt that failed with a permanent error inside the window
//! only burns budget; the cache short-circuits with the remembered error.
//! Rate-limit failures are never cached — they say nothing about the prompt.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::domain::error::{AidfError, ProviderCode};

/// First 16 hex chars of SHA-256, the cache key for a prompt.
pub fn prompt_hash(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

struct Entry {
    error: AidfError,
    recorded_at: Instant,
}

/// Per-task failure cache.
pub struct DedupCache {
    window: Duration,
    entries: HashMap<String, Entry>,
}

impl DedupCache {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window: Duration::from_millis(window_ms),
            entries: HashMap::new(),
        }
    }

    /// The cached failure for this prompt, if it is still inside the window.
    pub fn check(&mut self, prompt: &str) -> Option<AidfError> {
        let key = prompt_hash(prompt);
        match self.entries.get(&key) {
            Some(entry) if entry.recorded_at.elapsed() < self.window => {
                Some(entry.error.clone())
            }
            Some(_) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Remember a failure. Retryable errors and rate limits are ignored.
    pub fn record_failure(&mut self, prompt: &str, error: &AidfError) {
        if error.is_retryable() {
            return;
        }
        if matches!(
            error,
            AidfError::Provider {
                code: ProviderCode::RateLimit,
                ..
            }
        ) {
            return;
        }
        self.entries.insert(
            prompt_hash(prompt),
            Entry {
                error: error.clone(),
                recorded_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ProviderCode;

    #[test]
    fn test_prompt_hash_is_stable_16_hex() {
        let a = prompt_hash("same prompt");
        let b = prompt_hash("same prompt");
        let c = prompt_hash("different prompt");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_non_retryable_failure_is_cached() {
        let mut cache = DedupCache::new(60_000);
        let err = AidfError::api_error(Some(401), "bad key");
        cache.record_failure("broken prompt", &err);

        let hit = cache.check("broken prompt").expect("should hit");
        assert_eq!(hit.code_str(), "API_ERROR");
        assert!(cache.check("another prompt").is_none());
    }

    #[test]
    fn test_retryable_failures_are_not_cached() {
        let mut cache = DedupCache::new(60_000);
        cache.record_failure("p", &AidfError::api_error(Some(503), "overloaded"));
        assert!(cache.check("p").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_rate_limits_are_never_cached() {
        let mut cache = DedupCache::new(60_000);
        cache.record_failure("p", &AidfError::provider(ProviderCode::RateLimit, "429"));
        assert!(cache.check("p").is_none());
    }

    #[test]
    fn test_entries_expire() {
        let mut cache = DedupCache::new(0);
        cache.record_failure("p", &AidfError::api_error(Some(404), "gone"));
        assert!(cache.check("p").is_none());
        assert!(cache.is_empty());
    }
}
