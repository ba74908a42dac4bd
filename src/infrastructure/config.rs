//! Configuration loading with hierarchical merging.
//!
//! Precedence (lowest to highest): programmatic defaults, `.ai/config.yml`,
//! `AIDF_*` environment variables (nested keys split on `__`). After
//! extraction, `$NAME` string values are resolved from the environment and
//! `AIDF_TOKEN_BUDGET` overrides the configured token budget.

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use tracing::warn;

use crate::domain::error::{AidfError, AidfResult, ConfigCode};
use crate::domain::models::config::Config;

/// Environment variable overriding `rate_limit.token_budget`.
pub const TOKEN_BUDGET_ENV: &str = "AIDF_TOKEN_BUDGET";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the config for a project whose `.ai/` root is `ai_root`.
    pub fn load(ai_root: &Path) -> AidfResult<Config> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(ai_root.join("config.yml")))
            .merge(Env::prefixed("AIDF_").split("__"))
            .extract()
            .map_err(|e| {
                AidfError::config(ConfigCode::ParseError, format!("config failed to load: {e}"))
            })?;

        Self::resolve_env_refs(&mut config)?;

        if let Ok(value) = std::env::var(TOKEN_BUDGET_ENV) {
            match value.parse::<u64>() {
                Ok(budget) => config.rate_limit.token_budget = budget,
                Err(_) => warn!(value = %value, "ignoring unparseable {TOKEN_BUDGET_ENV}"),
            }
        }

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load from an explicit file, skipping discovery (used by tests and
    /// `--config`).
    pub fn load_from_file(path: &Path) -> AidfResult<Config> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .extract()
            .map_err(|e| {
                AidfError::config(
                    ConfigCode::ParseError,
                    format!("config {} failed to load: {e}", path.display()),
                )
            })?;
        Self::resolve_env_refs(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Resolve `$NAME` references in credential-bearing string fields.
    fn resolve_env_refs(config: &mut Config) -> AidfResult<()> {
        for field in [
            &mut config.provider.api_key,
            &mut config.provider.base_url,
            &mut config.provider.command,
            &mut config.provider.model,
        ] {
            if let Some(value) = field {
                if let Some(name) = value.strip_prefix('$') {
                    let name = name.to_string();
                    *value = std::env::var(&name).map_err(|_| {
                        AidfError::config(
                            ConfigCode::EnvVarMissing,
                            format!("environment variable ${name} referenced in config is not set"),
                        )
                        .with_context("var", name.clone())
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Reject configurations the executor cannot run with.
    pub fn validate(config: &Config) -> AidfResult<()> {
        if config.execution.max_consecutive_failures == 0 {
            return Err(AidfError::config(
                ConfigCode::Invalid,
                "execution.max_consecutive_failures must be at least 1",
            ));
        }
        if config.execution.iteration_timeout_ms == 0 {
            return Err(AidfError::config(
                ConfigCode::Invalid,
                "execution.iteration_timeout_ms must be positive",
            ));
        }
        if config.rate_limit.max_retries == 0 {
            return Err(AidfError::config(
                ConfigCode::Invalid,
                "rate_limit.max_retries cannot be 0",
            ));
        }
        if config.rate_limit.base_delay_ms > config.rate_limit.max_delay_ms {
            return Err(AidfError::config(
                ConfigCode::Invalid,
                format!(
                    "rate_limit.base_delay_ms ({}) must not exceed max_delay_ms ({})",
                    config.rate_limit.base_delay_ms, config.rate_limit.max_delay_ms
                ),
            ));
        }
        if config.conversation.max_messages == 0 {
            return Err(AidfError::config(
                ConfigCode::Invalid,
                "conversation.max_messages must be at least 1",
            ));
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(AidfError::config(
                ConfigCode::Invalid,
                format!(
                    "logging.level `{}` is not one of trace, debug, info, warn, error",
                    config.logging.level
                ),
            ));
        }
        if !["json", "pretty"].contains(&config.logging.format.as_str()) {
            return Err(AidfError::config(
                ConfigCode::Invalid,
                format!("logging.format `{}` is not json or pretty", config.logging.format),
            ));
        }
        Ok(())
    }
}
