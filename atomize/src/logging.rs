//! Diagnostic tracing for `atomize` and `atomize-server`.
//!
//! Logs go to stderr and never carry product output. Diff text is sensitive:
//! callers log its byte length and hash, and only log the text itself when
//! `log_diff` is enabled (see [`diff_preview`]).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected compact or json)")),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` when set.
///
/// # Example
/// ```bash
/// RUST_LOG=atomize=debug atomize plan --repo .
/// ```
pub fn init(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Compact => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init(),
    }
}

/// Diff text to attach to a log event, or `None` when diff logging is off.
pub fn diff_preview(diff: &str, log_diff: bool) -> Option<&str> {
    log_diff.then_some(diff)
}
