//! Provider implementations and the factory that selects one.

pub mod anthropic;
pub mod http;
pub mod openai;
pub mod subprocess;
pub mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::error::AidfResult;
use crate::domain::models::config::{Config, ProviderKind};
use crate::domain::ports::{GitClient, Provider};
use crate::services::scope_guard::ScopeGuard;
use crate::services::secret_scanner::SecretScanner;

use anthropic::AnthropicProvider;
use openai::OpenAiProvider;
use subprocess::SubprocessProvider;
use tools::ToolHandler;

/// Build the configured provider. HTTP providers get a tool handler bound
/// to the working directory, scope guard, and secret scanner; subprocess
/// providers detect changes through the git client instead.
pub fn build_provider(
    config: &Config,
    cwd: PathBuf,
    scope_guard: Arc<ScopeGuard>,
    scanner: Arc<SecretScanner>,
    git: Arc<dyn GitClient>,
) -> AidfResult<Arc<dyn Provider>> {
    match config.provider.kind {
        ProviderKind::SubprocessClaude | ProviderKind::SubprocessCursor => Ok(Arc::new(
            SubprocessProvider::new(&config.provider, &config.permissions, git),
        )),
        ProviderKind::HttpAnthropic => {
            let tools = Arc::new(ToolHandler::new(cwd, scope_guard, scanner));
            Ok(Arc::new(AnthropicProvider::new(config, tools)?))
        }
        ProviderKind::HttpOpenai => {
            let tools = Arc::new(ToolHandler::new(cwd, scope_guard, scanner));
            Ok(Arc::new(OpenAiProvider::new(config, tools)?))
        }
    }
}
