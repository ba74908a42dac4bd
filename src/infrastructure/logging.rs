//! Tracing initialization.
//!
//! Filter precedence: `AIDF_LOG` env, then `--verbose`, then the configured
//! level. Provider output that reaches log statements is scrubbed by the
//! secret scanner before logging, not here.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

use crate::domain::models::config::LoggingConfig;

/// Initialize the global subscriber. Returns the file-appender guard when
/// file logging is enabled; the caller keeps it alive for the process.
pub fn init_logging(config: &LoggingConfig, ai_root: &Path, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { &config.level };
    let filter = EnvFilter::try_from_env("AIDF_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("aidf={level},warn")));

    let mut guard = None;
    let builder = fmt().with_env_filter(filter).with_target(false);

    if config.file {
        let appender = tracing_appender::rolling::daily(ai_root.join("logs"), "aidf.log");
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);
        if config.format == "json" {
            builder.json().with_writer(writer).init();
        } else {
            builder.with_ansi(false).with_writer(writer).init();
        }
    } else if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }

    guard
}
