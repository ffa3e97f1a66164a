//! # Configuration Management
//!
//! This module handles loading and managing application configuration from
//! multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_PIPELINE_BASE_URL, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The bare `HOST` and `PORT` variables are also honored because deployment
//! platforms commonly inject them without a prefix.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub pipeline: PipelineConfig,
    pub session: SessionConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio transport format.
///
/// The wire protocol carries 16-bit signed little-endian PCM, mono, at
/// 24 kHz in both directions. These values are configuration mostly so they
/// appear in `/status` and config dumps; `validate()` pins them to the
/// protocol's fixed format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz (24000 for this protocol)
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono)
    pub channels: u8,

    /// Bit depth (16-bit PCM)
    pub bit_depth: u8,

    /// Upper bound on one utterance's accumulated PCM bytes
    pub max_utterance_bytes: usize,
}

/// Upstream speech/agent pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Base URL of the transcription/agent/synthesis service
    pub base_url: String,

    /// Per-request timeout in seconds; on expiry the session gets an
    /// `upstream_unavailable` error frame instead of hanging
    pub request_timeout_secs: u64,
}

/// Per-session behavior and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// User id assumed when a connection does not identify itself.
    /// In production this comes from authentication; the voice demo client
    /// connects anonymously.
    pub default_user_id: String,

    /// Maximum number of concurrently open voice sessions
    pub max_concurrent_sessions: usize,

    /// Seconds between server-initiated heartbeat pings
    pub heartbeat_interval_secs: u64,

    /// Seconds of client silence before the connection is dropped
    pub client_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                sample_rate: 24_000,
                channels: 1,
                bit_depth: 16,
                max_utterance_bytes: 8 * 1024 * 1024, // ~3 minutes of 24kHz mono PCM
            },
            pipeline: PipelineConfig {
                base_url: "http://127.0.0.1:9100".to_string(),
                request_timeout_secs: 30,
            },
            session: SessionConfig {
                default_user_id: "demo-user".to_string(),
                max_concurrent_sessions: 32,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Audio format matches the protocol's fixed 24kHz/16-bit/mono PCM
    /// - Session limits and timeouts are non-zero and consistent
    /// - The pipeline base URL is present
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate != 24_000 {
            return Err(anyhow::anyhow!(
                "Audio sample rate must be 24000 Hz, got {}",
                self.audio.sample_rate
            ));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!("Audio must be mono (1 channel)"));
        }

        if self.audio.bit_depth != 16 {
            return Err(anyhow::anyhow!("Audio must be 16-bit PCM"));
        }

        if self.audio.max_utterance_bytes == 0 {
            return Err(anyhow::anyhow!("Max utterance bytes must be greater than 0"));
        }

        if self.pipeline.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Pipeline base URL must be set"));
        }

        if self.pipeline.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Pipeline request timeout must be greater than 0"));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.session.heartbeat_interval_secs >= self.session.client_timeout_secs {
            return Err(anyhow::anyhow!(
                "Heartbeat interval must be shorter than the client timeout"
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config
    /// updates through the REST API).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed. The audio section is
    /// intentionally not updatable — the transport format is part of the
    /// wire protocol, not a tuning knob.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(pipeline) = partial.get("pipeline") {
            if let Some(url) = pipeline.get("base_url").and_then(|v| v.as_str()) {
                self.pipeline.base_url = url.to_string();
            }
            if let Some(timeout) = pipeline.get("request_timeout_secs").and_then(|v| v.as_u64()) {
                self.pipeline.request_timeout_secs = timeout;
            }
        }

        if let Some(session) = partial.get("session") {
            if let Some(sessions) = session
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.session.max_concurrent_sessions = sessions as usize;
            }
            if let Some(heartbeat) = session
                .get("heartbeat_interval_secs")
                .and_then(|v| v.as_u64())
            {
                self.session.heartbeat_interval_secs = heartbeat;
            }
            if let Some(timeout) = session.get("client_timeout_secs").and_then(|v| v.as_u64()) {
                self.session.client_timeout_secs = timeout;
            }
        }

        self.validate()?;
        Ok(())
    }
}
