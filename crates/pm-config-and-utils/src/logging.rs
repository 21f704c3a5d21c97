//! Logging initialization.
//!
//! Thin wrapper over the observability crate so binaries configure tracing
//! in one place.

use observability::LogConfig;
use std::path::PathBuf;

/// Initialize logging for one mcp-pm process.
///
/// * `service` - name written into every JSONL line ("hook", "watch", ...)
/// * `level` - default filter, overridden by `RUST_LOG`
/// * `log_path` - central log file; `None` uses the observability default
/// * `also_stderr` - hooks pass `false` because the invoking tool reads their
///   stdio
///
/// # Example
///
/// ```ignore
/// init_logging("watch", "info", None, true);
/// tracing::info!("viewer started");
/// ```
pub fn init_logging(service: &str, level: &str, log_path: Option<PathBuf>, also_stderr: bool) {
    observability::init_with_config(LogConfig {
        service_name: service.into(),
        default_level: level.into(),
        log_path,
        also_stderr,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
