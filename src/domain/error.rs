//! Error taxonomy for the execution engine.
//!
//! Every failure surfaced by the orchestrator belongs to one of seven
//! categories, each carrying an enumerated code, a message, and a small
//! key/value context map. The executor dispatches recovery on
//! `(category, code)`; `is_retryable` is the shared retry vocabulary.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::json;
use thiserror::Error;

/// The seven error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Provider,
    Timeout,
    Validation,
    Scope,
    Config,
    Git,
    Permission,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Scope => "scope",
            Self::Config => "config",
            Self::Git => "git",
            Self::Permission => "permission",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! code_enum {
    ($name:ident { $($variant:ident => $code:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $code),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

code_enum!(ProviderCode {
    Crash => "CRASH",
    NotAvailable => "NOT_AVAILABLE",
    ApiError => "API_ERROR",
    RateLimit => "RATE_LIMIT",
});

code_enum!(TimeoutCode {
    IterationTimeout => "ITERATION_TIMEOUT",
    OperationTimeout => "OPERATION_TIMEOUT",
});

/// Validation codes double as the phase the failing command belonged to.
code_enum!(ValidationCode {
    PreCommit => "PRE_COMMIT",
    PrePush => "PRE_PUSH",
    PrePr => "PRE_PR",
});

code_enum!(ScopeCode {
    Forbidden => "FORBIDDEN",
    OutsideAllowed => "OUTSIDE_ALLOWED",
    UserDenied => "USER_DENIED",
});

code_enum!(ConfigCode {
    Invalid => "INVALID",
    Missing => "MISSING",
    EnvVarMissing => "ENV_VAR_MISSING",
    ParseError => "PARSE_ERROR",
});

code_enum!(GitCode {
    CommitFailed => "COMMIT_FAILED",
    PushFailed => "PUSH_FAILED",
    RevertFailed => "REVERT_FAILED",
    StatusFailed => "STATUS_FAILED",
});

code_enum!(PermissionCode {
    SkipDenied => "SKIP_DENIED",
    CommandBlocked => "COMMAND_BLOCKED",
    FileAccess => "FILE_ACCESS",
});

/// Categorized orchestrator error.
///
/// `Provider::ApiError` carries the HTTP status when one exists; a `None`
/// status means a transport-level failure (connection refused, reset),
/// which is treated as retryable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AidfError {
    #[error("provider {code}: {message}")]
    Provider {
        code: ProviderCode,
        message: String,
        status: Option<u16>,
        context: BTreeMap<String, String>,
    },

    #[error("timeout {code}: {message}")]
    Timeout {
        code: TimeoutCode,
        message: String,
        context: BTreeMap<String, String>,
    },

    #[error("validation {code}: `{command}` exited with {exit_code:?}")]
    Validation {
        code: ValidationCode,
        command: String,
        exit_code: Option<i32>,
        output: String,
        context: BTreeMap<String, String>,
    },

    #[error("scope {code}: {message}")]
    Scope {
        code: ScopeCode,
        files: Vec<String>,
        message: String,
        context: BTreeMap<String, String>,
    },

    #[error("config {code}: {message}")]
    Config {
        code: ConfigCode,
        message: String,
        context: BTreeMap<String, String>,
    },

    #[error("git {code}: {message}")]
    Git {
        code: GitCode,
        message: String,
        context: BTreeMap<String, String>,
    },

    #[error("permission {code}: {message}")]
    Permission {
        code: PermissionCode,
        message: String,
        context: BTreeMap<String, String>,
    },
}

impl AidfError {
    pub fn provider(code: ProviderCode, message: impl Into<String>) -> Self {
        Self::Provider {
            code,
            message: message.into(),
            status: None,
            context: BTreeMap::new(),
        }
    }

    pub fn api_error(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Provider {
            code: ProviderCode::ApiError,
            message: message.into(),
            status,
            context: BTreeMap::new(),
        }
    }

    pub fn timeout(code: TimeoutCode, message: impl Into<String>) -> Self {
        Self::Timeout {
            code,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn validation(
        code: ValidationCode,
        command: impl Into<String>,
        exit_code: Option<i32>,
        output: impl Into<String>,
    ) -> Self {
        Self::Validation {
            code,
            command: command.into(),
            exit_code,
            output: output.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn scope(code: ScopeCode, files: Vec<String>, message: impl Into<String>) -> Self {
        Self::Scope {
            code,
            files,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn config(code: ConfigCode, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn git(code: GitCode, message: impl Into<String>) -> Self {
        Self::Git {
            code,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn permission(code: PermissionCode, message: impl Into<String>) -> Self {
        Self::Permission {
            code,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Attach a context entry, builder-style.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().insert(key.into(), value.into());
        self
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Provider { .. } => ErrorCategory::Provider,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Scope { .. } => ErrorCategory::Scope,
            Self::Config { .. } => ErrorCategory::Config,
            Self::Git { .. } => ErrorCategory::Git,
            Self::Permission { .. } => ErrorCategory::Permission,
        }
    }

    /// The enumerated code as its wire string.
    pub fn code_str(&self) -> &'static str {
        match self {
            Self::Provider { code, .. } => code.as_str(),
            Self::Timeout { code, .. } => code.as_str(),
            Self::Validation { code, .. } => code.as_str(),
            Self::Scope { code, .. } => code.as_str(),
            Self::Config { code, .. } => code.as_str(),
            Self::Git { code, .. } => code.as_str(),
            Self::Permission { code, .. } => code.as_str(),
        }
    }

    /// Shared retry vocabulary.
    ///
    /// - provider: CRASH and RATE_LIMIT retry; API_ERROR retries on 5xx or
    ///   transport failures (no status); NOT_AVAILABLE never.
    /// - timeout and validation always retry (validation output is fed back
    ///   to the agent).
    /// - scope retries except USER_DENIED.
    /// - git: COMMIT/PUSH/STATUS retry, REVERT never.
    /// - config and permission never.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { code, status, .. } => match code {
                ProviderCode::Crash | ProviderCode::RateLimit => true,
                ProviderCode::NotAvailable => false,
                ProviderCode::ApiError => status.is_none_or(|s| s >= 500),
            },
            Self::Timeout { .. } | Self::Validation { .. } => true,
            Self::Scope { code, .. } => !matches!(code, ScopeCode::UserDenied),
            Self::Config { .. } | Self::Permission { .. } => false,
            Self::Git { code, .. } => !matches!(code, GitCode::RevertFailed),
        }
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        match self {
            Self::Provider { context, .. }
            | Self::Timeout { context, .. }
            | Self::Validation { context, .. }
            | Self::Scope { context, .. }
            | Self::Config { context, .. }
            | Self::Git { context, .. }
            | Self::Permission { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut BTreeMap<String, String> {
        match self {
            Self::Provider { context, .. }
            | Self::Timeout { context, .. }
            | Self::Validation { context, .. }
            | Self::Scope { context, .. }
            | Self::Config { context, .. }
            | Self::Git { context, .. }
            | Self::Permission { context, .. } => context,
        }
    }

    /// Type name used in the serialized form, e.g. `ScopeError`.
    pub fn name(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Provider => "ProviderError",
            ErrorCategory::Timeout => "TimeoutError",
            ErrorCategory::Validation => "ValidationError",
            ErrorCategory::Scope => "ScopeError",
            ErrorCategory::Config => "ConfigError",
            ErrorCategory::Git => "GitError",
            ErrorCategory::Permission => "PermissionError",
        }
    }

    /// Wire form consumed by reports and notifications.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "name": self.name(),
            "code": self.code_str(),
            "category": self.category().as_str(),
            "retryable": self.is_retryable(),
            "message": self.to_string(),
            "context": self.context(),
        })
    }
}

/// Result alias used throughout the crate.
pub type AidfResult<T> = Result<T, AidfError>;

/// Free-function form kept for call sites that hold the error behind a
/// reference.
pub fn is_retryable(err: &AidfError) -> bool {
    err.is_retryable()
}
