//! Process-scoped configuration, loaded once per invocation.
//!
//! Every field is optional in `.ai/config.yml`; defaults are the documented
//! values below. String values of the form `$NAME` are resolved against the
//! environment at load time by the config loader.

use serde::{Deserialize, Serialize};

/// Which provider backend executes iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    SubprocessClaude,
    SubprocessCursor,
    HttpAnthropic,
    HttpOpenai,
}

impl ProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SubprocessClaude => "subprocess-claude",
            Self::SubprocessCursor => "subprocess-cursor",
            Self::HttpAnthropic => "http-anthropic",
            Self::HttpOpenai => "http-openai",
        }
    }

    pub const fn is_subprocess(self) -> bool {
        matches!(self, Self::SubprocessClaude | Self::SubprocessCursor)
    }
}

/// Scope-enforcement mode for files the agent touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    #[default]
    Strict,
    Ask,
    Permissive,
}

/// What to do when agent output contains secret material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecretsMode {
    #[default]
    Warn,
    Block,
    Redact,
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Provider selection.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Execution loop limits.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Conversation window sizing.
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Permission handling.
    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// Retry / backoff / budget knobs.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Scope-enforcement mode.
    #[serde(default)]
    pub scope_enforcement: ScopeMode,

    /// Commit each iteration's in-scope changes.
    #[serde(default = "default_true")]
    pub auto_commit: bool,

    /// Push the branch in postflight (best-effort).
    #[serde(default)]
    pub auto_push: bool,

    /// Prefix for generated commit messages.
    #[serde(default = "default_commit_prefix")]
    pub commit_prefix: String,

    /// Validation commands per phase.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Secret scanning policy.
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Accept `<TASK_COMPLETE>` even when the same iteration violated scope.
    /// The conservative default keeps the task in the loop.
    #[serde(default)]
    pub allow_completion_despite_scope_violation: bool,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-model cost overrides, matched by substring.
    #[serde(default)]
    pub cost_overrides: Vec<CostRate>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            execution: ExecutionConfig::default(),
            conversation: ConversationConfig::default(),
            permissions: PermissionsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            scope_enforcement: ScopeMode::default(),
            auto_commit: true,
            auto_push: false,
            commit_prefix: default_commit_prefix(),
            validation: ValidationConfig::default(),
            secrets: SecretsConfig::default(),
            allow_completion_despite_scope_violation: false,
            logging: LoggingConfig::default(),
            cost_overrides: vec![],
        }
    }
}

/// Provider selection and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderConfig {
    /// Backend type.
    #[serde(default = "default_provider_kind", rename = "type")]
    pub kind: ProviderKind,

    /// Model identifier passed to the backend.
    #[serde(default)]
    pub model: Option<String>,

    /// API key or `$ENV_VAR` reference (HTTP providers only).
    #[serde(default)]
    pub api_key: Option<String>,

    /// Override for the subprocess executable path.
    #[serde(default)]
    pub command: Option<String>,

    /// Override for the API base URL (testing / proxies).
    #[serde(default)]
    pub base_url: Option<String>,
}

const fn default_provider_kind() -> ProviderKind {
    ProviderKind::SubprocessClaude
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            model: None,
            api_key: None,
            command: None,
            base_url: None,
        }
    }
}

/// Execution loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionConfig {
    /// Maximum iterations before the task is marked failed.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Consecutive failed iterations before blocking.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Per-iteration provider timeout in milliseconds.
    #[serde(default = "default_iteration_timeout_ms")]
    pub iteration_timeout_ms: u64,

    /// Reuse the provider's conversation state across iterations.
    #[serde(default = "default_true")]
    pub session_continuation: bool,
}

const fn default_max_iterations() -> u32 {
    10
}

const fn default_max_consecutive_failures() -> u32 {
    3
}

const fn default_iteration_timeout_ms() -> u64 {
    300_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_consecutive_failures: default_max_consecutive_failures(),
            iteration_timeout_ms: default_iteration_timeout_ms(),
            session_continuation: true,
        }
    }
}

/// Conversation window sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConversationConfig {
    /// Maximum messages kept between provider rounds.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Head messages never evicted (the system/context seed).
    #[serde(default = "default_preserve_first")]
    pub preserve_first_n: usize,

    /// Tail messages never evicted.
    #[serde(default = "default_preserve_last")]
    pub preserve_last_n: usize,

    /// Replace evicted middle with a synthetic summary message.
    #[serde(default)]
    pub summarize_on_trim: bool,
}

const fn default_max_messages() -> usize {
    50
}

const fn default_preserve_first() -> usize {
    1
}

const fn default_preserve_last() -> usize {
    20
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            preserve_first_n: default_preserve_first(),
            preserve_last_n: default_preserve_last(),
            summarize_on_trim: false,
        }
    }
}

/// Permission handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PermissionsConfig {
    /// Pass the skip-permissions flag to subprocess agents.
    #[serde(default)]
    pub skip_permissions: bool,

    /// Emit a security warning when permissions are skipped.
    #[serde(default = "default_true")]
    pub warn_on_skip: bool,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            skip_permissions: false,
            warn_on_skip: true,
        }
    }
}

/// Retry / backoff / budget knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Attempts per provider call (first try included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Decorrelated-jitter base delay.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Delay ceiling.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Cumulative input+output token cap; 0 means unlimited.
    #[serde(default)]
    pub token_budget: u64,

    /// Sleep between iterations; 0 disables.
    #[serde(default)]
    pub cooldown_ms: u64,

    /// How long a non-retryable failure suppresses identical prompts.
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

const fn default_max_delay_ms() -> u64 {
    60_000
}

const fn default_dedup_window_ms() -> u64 {
    60_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            token_budget: 0,
            cooldown_ms: 0,
            dedup_window_ms: default_dedup_window_ms(),
        }
    }
}

/// Validation commands per phase boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidationConfig {
    /// Commands run before each commit.
    #[serde(default)]
    pub pre_commit: Vec<String>,

    /// Commands run before pushing.
    #[serde(default)]
    pub pre_push: Vec<String>,

    /// Commands run before opening a PR.
    #[serde(default)]
    pub pre_pr: Vec<String>,

    /// Per-command timeout in milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

const fn default_command_timeout_ms() -> u64 {
    120_000
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            pre_commit: vec![],
            pre_push: vec![],
            pre_pr: vec![],
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

/// Secret scanning policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SecretsConfig {
    /// warn, block, or redact.
    #[serde(default)]
    pub mode: SecretsMode,

    /// Also flag high-entropy tokens.
    #[serde(default = "default_true")]
    pub entropy_detection: bool,

    /// File globs exempt from scanning.
    #[serde(default)]
    pub allowed_files: Vec<String>,

    /// Regexes whose matches are not treated as secrets.
    #[serde(default)]
    pub allowed_patterns: Vec<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            mode: SecretsMode::default(),
            entropy_detection: true,
            allowed_files: vec![],
            allowed_patterns: vec![],
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty.
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Also write a daily log file under `.ai/logs/`.
    #[serde(default)]
    pub file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: false,
        }
    }
}

/// One cost-table row; `model_substring` is matched against the configured
/// model id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CostRate {
    pub model_substring: String,
    /// USD per million input tokens.
    pub input_per_mtok: f64,
    /// USD per million output tokens.
    pub output_per_mtok: f64,
}

const fn default_true() -> bool {
    true
}

fn default_commit_prefix() -> String {
    "aidf".to_string()
}
