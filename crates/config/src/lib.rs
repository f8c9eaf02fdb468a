//! Configuration loading and validation for chatrelay.
//!
//! Loads configuration from `~/.chatrelay/config.toml` with environment
//! variable overrides for every credential and connection setting.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.chatrelay/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat backend credentials and endpoints.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Model backend credentials.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Tool credentials.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// HTTP control plane.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Agent lifecycle settings.
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("stream", &self.stream)
            .field("providers", &self.providers)
            .field("tools", &self.tools)
            .field("gateway", &self.gateway)
            .field("agents", &self.agents)
            .finish()
    }
}

/// Chat backend settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Application API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Application API secret, used to mint user tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,

    /// REST base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Realtime websocket URL.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Interval between client pings on the realtime connection.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Websocket connect timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://chat.stream-io-api.com".into()
}
fn default_ws_url() -> String {
    "wss://chat.stream-io-api.com/connect".into()
}
fn default_heartbeat_secs() -> u64 {
    55
}
fn default_connect_timeout_secs() -> u64 {
    15
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            base_url: default_base_url(),
            ws_url: default_ws_url(),
            heartbeat_secs: default_heartbeat_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("base_url", &self.base_url)
            .field("ws_url", &self.ws_url)
            .field("heartbeat_secs", &self.heartbeat_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Model backend credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
}

impl std::fmt::Debug for ProvidersConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvidersConfig")
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("anthropic_api_key", &redact(&self.anthropic_api_key))
            .finish()
    }
}

/// Tool credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openweather_api_key: Option<String>,
}

impl std::fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("openweather_api_key", &redact(&self.openweather_api_key))
            .finish()
    }
}

/// HTTP control plane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Agent lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Agents idle longer than this are swept out of the registry.
    #[serde(default = "default_inactivity_threshold_mins")]
    pub inactivity_threshold_mins: u64,

    /// How often the sweep task runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_inactivity_threshold_mins() -> u64 {
    480
}
fn default_sweep_interval_secs() -> u64 {
    5
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_mins: default_inactivity_threshold_mins(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            providers: ProvidersConfig::default(),
            tools: ToolsConfig::default(),
            gateway: GatewayConfig::default(),
            agents: AgentsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatrelay/config.toml)
    /// and apply environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(config)
    }

    /// Environment variables win over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STREAM_API_KEY") {
            self.stream.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("STREAM_API_SECRET") {
            self.stream.api_secret = Some(v);
        }
        if let Ok(v) = std::env::var("STREAM_WS_URL") {
            self.stream.ws_url = v;
        }
        if let Ok(v) = std::env::var("STREAM_BASE_URL") {
            self.stream.base_url = v;
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.providers.openai_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            self.providers.anthropic_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OPENWEATHER_API_KEY") {
            self.tools.openweather_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("PORT")
            && let Ok(port) = v.parse()
        {
            self.gateway.port = port;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatrelay")
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },
}
