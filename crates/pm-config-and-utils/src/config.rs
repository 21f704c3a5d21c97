//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default control-plane HTTP base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:48293";

/// Default push-channel WebSocket URL.
pub const DEFAULT_WS_URL: &str = "ws://localhost:48293/ws";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Producer-side batching settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Pending records that trigger an immediate flush.
    pub capacity: usize,
    /// Periodic flush cadence in milliseconds.
    pub flush_interval_ms: u64,
    /// Upper bound of the retry store.
    pub max_retry: usize,
    /// Timeout for one batch submission in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            capacity: 50,
            flush_interval_ms: 2_000,
            max_retry: 200,
            request_timeout_ms: 3_000,
        }
    }
}

/// Consumer-side push connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Heartbeat ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Base reconnect delay in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Maximum reconnect delay in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Seconds to wait for a pong after a ping; 0 disables the check.
    pub pong_timeout_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 10,
            pong_timeout_secs: 10,
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Control-plane HTTP base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Push-channel WebSocket URL.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Batching settings for hook producers.
    #[serde(default)]
    pub batch: BatchSettings,
    /// Push connection settings for viewers.
    #[serde(default)]
    pub relay: RelaySettings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_ws_url() -> String {
    DEFAULT_WS_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            batch: BatchSettings::default(),
            relay: RelaySettings::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup.
    ///
    /// `MCP_PM_API_URL` wins over the legacy `FASTAPI_BASE_URL`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).and_then(non_empty);

        if let Some(api_url) = get("MCP_PM_API_URL").or_else(|| get("FASTAPI_BASE_URL")) {
            self.api_url = api_url;
        }
        if let Some(ws_url) = get("MCP_PM_WS_URL") {
            self.ws_url = ws_url;
        }
        if let Some(log_level) = get("MCP_PM_LOG_LEVEL") {
            self.log_level = log_level;
        }
    }

    /// Check URLs and limits.
    pub fn validate(&self) -> CoreResult<()> {
        self.api_url()?;
        let ws = self.ws_url()?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(CoreError::Config(format!(
                "ws_url must use ws:// or wss://, got {}",
                ws.scheme()
            )));
        }
        if self.batch.capacity == 0 {
            return Err(CoreError::Config("batch.capacity must be at least 1".into()));
        }
        if self.batch.flush_interval_ms == 0 {
            return Err(CoreError::Config(
                "batch.flush_interval_ms must be positive".into(),
            ));
        }
        if self.relay.heartbeat_interval_secs == 0 {
            return Err(CoreError::Config(
                "relay.heartbeat_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Get the control-plane URL as a parsed URL.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_url).map_err(CoreError::from)
    }

    /// Get the push-channel URL as a parsed URL.
    pub fn ws_url(&self) -> CoreResult<Url> {
        Url::parse(&self.ws_url).map_err(CoreError::from)
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
