//! Runtime configuration for bridge sessions.
//!
//! The server crate owns file/env loading; this module only defines the
//! plain structs a session needs at runtime, with defaults that match a
//! typical narrowband call.

use std::time::Duration;

/// Connection settings for the voice-AI realtime backend.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Websocket URL of the realtime endpoint.
    pub url: String,
    /// Bearer token presented on connect.
    pub api_key: String,
    /// Model requested in the session configuration.
    pub model: String,
    /// Voice requested for synthesized audio.
    pub voice: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".to_string(),
            api_key: String::new(),
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "alloy".to_string(),
        }
    }
}

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long the realtime session-configuration exchange may take
    /// before the session aborts.
    pub handshake_timeout: Duration,
    /// How long both directions may stay silent before the session closes.
    pub idle_timeout: Duration,
    /// Upper bound on teardown once the session enters closing.
    pub close_grace: Duration,
    /// Capacity, in 20 ms frames, of each per-session audio channel.
    /// When a channel is full the reader side stops pulling from its
    /// socket rather than dropping or buffering without bound.
    pub audio_buffer_frames: usize,
    pub realtime: RealtimeConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            close_grace: Duration::from_secs(3),
            audio_buffer_frames: 256,
            realtime: RealtimeConfig::default(),
        }
    }
}
