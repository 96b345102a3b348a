//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

use switchboard_bridge::{BridgeConfig, RealtimeConfig};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Realtime voice-AI backend settings.
    #[serde(default)]
    pub realtime: RealtimeSection,

    /// Backend conversation service settings.
    #[serde(default)]
    pub backend: BackendSection,

    /// Per-session bridge tunables.
    #[serde(default)]
    pub bridge: BridgeSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL (`wss://...`) advertised in the
    /// TwiML answer. When unset the answer uses the request's Host
    /// header, which is right for tunnelled development setups.
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Realtime backend connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeSection {
    #[serde(default = "default_realtime_url")]
    pub url: String,

    /// Bearer token. Usually supplied via environment, not the file.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,
}

/// Conversation service (context fetch, transcript push) settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
}

/// Session timing and buffering.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSection {
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,

    #[serde(default = "default_audio_buffer_frames")]
    pub audio_buffer_frames: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "switchboard_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

fn default_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_close_grace_ms() -> u64 {
    3_000
}

fn default_audio_buffer_frames() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            api_key: String::new(),
            model: default_model(),
            voice: default_voice(),
        }
    }
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
        }
    }
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            close_grace_ms: default_close_grace_ms(),
            audio_buffer_frames: default_audio_buffer_frames(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Assembles the per-session bridge configuration handed to every
    /// new media stream.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            handshake_timeout: Duration::from_millis(self.bridge.handshake_timeout_ms),
            idle_timeout: Duration::from_secs(self.bridge.idle_timeout_secs),
            close_grace: Duration::from_millis(self.bridge.close_grace_ms),
            audio_buffer_frames: self.bridge.audio_buffer_frames,
            realtime: RealtimeConfig {
                url: self.realtime.url.clone(),
                api_key: self.realtime.api_key.clone(),
                model: self.realtime.model.clone(),
                voice: self.realtime.voice.clone(),
            },
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `SWITCHBOARD_HOST` overrides `server.host`
/// - `SWITCHBOARD_PORT` overrides `server.port`
/// - `SWITCHBOARD_PUBLIC_URL` overrides `server.public_url`
/// - `SWITCHBOARD_REALTIME_URL` overrides `realtime.url`
/// - `SWITCHBOARD_REALTIME_API_KEY` overrides `realtime.api_key`
/// - `SWITCHBOARD_BACKEND_URL` overrides `backend.base_url`
/// - `SWITCHBOARD_LOG_LEVEL` overrides `logging.level`
/// - `SWITCHBOARD_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("SWITCHBOARD_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("SWITCHBOARD_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(url) = std::env::var("SWITCHBOARD_PUBLIC_URL") {
        config.server.public_url = Some(url);
    }
    if let Ok(url) = std::env::var("SWITCHBOARD_REALTIME_URL") {
        config.realtime.url = url;
    }
    if let Ok(key) = std::env::var("SWITCHBOARD_REALTIME_API_KEY") {
        config.realtime.api_key = key;
    }
    if let Ok(url) = std::env::var("SWITCHBOARD_BACKEND_URL") {
        config.backend.base_url = url;
    }
    if let Ok(level) = std::env::var("SWITCHBOARD_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("SWITCHBOARD_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
