//! Configuration management for shell-bridge.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::{AppState, BridgeSettings, ServerConfig};
use crate::backend::{BackendOptions, Multiplexer, NoMultiplexer, TmuxMultiplexer};
use crate::cli::Args;
use crate::client::ClientConfig;
use crate::pty::{PtySize, DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_TERM};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Bridge timing and backend defaults.
    pub bridge: BridgeSection,
    /// Client reconnection and tab settings.
    pub client: ClientSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            graceful_shutdown: true,
        }
    }
}

/// Bridge configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    pub handshake_timeout_secs: u64,
    pub directory_poll_interval_ms: u64,
    pub ping_interval_secs: u64,
    pub liveness_timeout_secs: u64,
    pub remote_connect_timeout_secs: u64,
    /// Initial terminal width.
    pub cols: u16,
    /// Initial terminal height.
    pub rows: u16,
    /// `TERM` exported to backends.
    pub term: String,
    /// Use tmux when it is installed.
    pub multiplexer: bool,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 5,
            directory_poll_interval_ms: 2000,
            ping_interval_secs: 30,
            liveness_timeout_secs: 60,
            remote_connect_timeout_secs: 30,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            term: DEFAULT_TERM.to_string(),
            multiplexer: true,
        }
    }
}

/// Client configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Maximum number of open tabs.
    pub tab_cap: usize,
    /// Records older than this many days are dropped on load.
    pub retention_days: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_secs: u64,
    pub resize_debounce_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            tab_cap: 5,
            retention_days: 3,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 2000,
            connect_timeout_secs: 5,
            resize_debounce_ms: 100,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a filter directive.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("SHELL_BRIDGE_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("SHELL_BRIDGE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Some(level) = var("SHELL_BRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }

        if let Some(flag) = var("SHELL_BRIDGE_NO_MULTIPLEXER") {
            if env_flag(&flag) {
                self.bridge.multiplexer = false;
            }
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
        if args.no_multiplexer {
            self.bridge.multiplexer = false;
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let mut server_config = ServerConfig::new(host.to_string(), self.server.port);
        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }
        Ok(server_config)
    }

    pub fn to_bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            handshake_timeout: Duration::from_secs(self.bridge.handshake_timeout_secs),
            directory_poll_interval: Duration::from_millis(
                self.bridge.directory_poll_interval_ms.max(1),
            ),
            ping_interval: Duration::from_secs(self.bridge.ping_interval_secs.max(1)),
            liveness_timeout: Duration::from_secs(self.bridge.liveness_timeout_secs),
        }
    }

    pub fn to_backend_options(&self) -> BackendOptions {
        BackendOptions {
            size: PtySize::new(self.bridge.rows, self.bridge.cols).clamped(),
            term: self.bridge.term.clone(),
            remote_timeout: Duration::from_secs(self.bridge.remote_connect_timeout_secs.max(1)),
        }
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            tab_cap: self.client.tab_cap,
            retention: Duration::from_secs(
                self.client.retention_days.saturating_mul(SECS_PER_DAY),
            ),
            max_reconnect_attempts: self.client.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.client.reconnect_delay_ms),
            connect_timeout: Duration::from_secs(self.client.connect_timeout_secs),
            resize_debounce: Duration::from_millis(self.client.resize_debounce_ms),
        }
    }

    /// Build the server state this configuration describes.
    pub fn to_app_state(&self) -> AppState {
        let mux: Arc<dyn Multiplexer> = if self.bridge.multiplexer {
            Arc::new(TmuxMultiplexer::new())
        } else {
            Arc::new(NoMultiplexer)
        };
        AppState::with_multiplexer(mux, self.to_backend_options(), self.to_bridge_settings())
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
        }
    }
}

impl std::error::Error for ConfigError {}
