//! # Observability
//!
//! Centralized tracing setup for the mcp-pm workspace.
//!
//! ## Design Philosophy
//!
//! Binaries are **log producers**. They call `observability::init()` once at
//! startup and use standard `tracing` macros everywhere else. Library crates
//! never install a subscriber.
//!
//! ## Dev Mode
//!
//! With the `dev` feature every process appends structured JSONL to a single
//! central file: `~/.mcp-pm/logs/dev.jsonl`. Hook invocations are short-lived
//! and own neither a terminal nor their stdout, so this file is where their
//! delivery failures end up:
//!
//! - `tail -f ~/.mcp-pm/logs/dev.jsonl | jq`
//! - `lnav ~/.mcp-pm/logs/dev.jsonl`
//!
//! Multi-process safety comes from append-only writes flushed per line.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init("watch");
//!     tracing::info!("viewer started");
//! }
//! ```
//!
//! Or with configuration:
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "hook".into(),
//!     default_level: "debug".into(),
//!     also_stderr: false,
//!     ..Default::default()
//! });
//! ```

#[cfg(feature = "dev")]
mod dev;
#[cfg(feature = "dev")]
mod json_layer;

use std::path::PathBuf;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "hook", "watch").
    /// Included in every JSONL line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.mcp-pm/logs/dev.jsonl` in dev mode.
    pub log_path: Option<PathBuf>,

    /// Also emit human-readable logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
        }
    }
}

/// Initialize the observability layer with default settings.
///
/// ```rust,ignore
/// observability::init("watch");
/// tracing::info!("ready");
/// ```
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
///
/// Calling this more than once is harmless: only the first subscriber is
/// installed.
pub fn init_with_config(config: LogConfig) {
    #[cfg(feature = "dev")]
    {
        dev::init_dev_subscriber(&config);
    }

    #[cfg(not(feature = "dev"))]
    {
        use tracing_subscriber::util::SubscriberInitExt;

        if !config.also_stderr {
            return;
        }
        // stdout is reserved for command output (hook responses), so the
        // compact formatter writes to stderr.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.default_level)),
            )
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .finish()
            .try_init();
    }
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
