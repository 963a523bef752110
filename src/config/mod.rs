//! Configuration module for the VocaTa realtime client
//!
//! This module loads client configuration from .env files, environment
//! variables and YAML files. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use vocata_realtime::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("config.yaml");
//! let config = ClientConfig::from_file(&config_path)?;
//!
//! println!("Session endpoint: {}", config.ws_url);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod env;
mod yaml;

pub use yaml::{
    AuthYaml, CaptureYaml, ReconnectYaml, ServerYaml, TransportYaml, VadYaml, YamlConfig,
};

use crate::core::capture::{CaptureConfig, CapturePolicy};
use crate::core::chat::ChatConfig;
use crate::core::transport::{ReconnectionConfig, TransportConfig};

/// Default backend address used when nothing is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:9009";

/// Client configuration
///
/// Contains everything the CLI needs to talk to a VocaTa backend:
/// - HTTP API and WebSocket endpoints
/// - Access token (optional; `login` can obtain one)
/// - Session transport settings (timeouts, heartbeat, reconnection)
/// - Capture and voice activity detection settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the HTTP API, e.g. `http://localhost:9009`
    pub api_url: String,
    /// Base URL of the WebSocket endpoint, e.g. `ws://localhost:9009`
    pub ws_url: String,
    /// Access token for both HTTP and WebSocket calls
    pub token: Option<String>,
    /// Seconds to wait for the server to confirm a session
    pub connect_timeout_secs: u64,
    /// Heartbeat interval; `None` disables pings
    pub ping_interval_secs: Option<u64>,
    pub reconnection: ReconnectionConfig,
    /// Capture settings, including the VAD parameters
    pub capture: CaptureConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: derive_ws_url(DEFAULT_API_URL),
            token: None,
            connect_timeout_secs: 10,
            ping_interval_secs: Some(30),
            reconnection: ReconnectionConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl Drop for ClientConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        // Zeroize the access token to prevent leaks of sensitive data
        if let Some(ref mut token) = self.token {
            token.zeroize();
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// The `.env` file is loaded by the binary at startup, so its values are
    /// visible here as environment variables.
    ///
    /// # Errors
    /// Returns an error if an environment variable has an invalid format or
    /// the resulting configuration fails validation.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the merged configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let api = url::Url::parse(&self.api_url)
            .map_err(|e| format!("Invalid API URL '{}': {e}", self.api_url))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(format!("API URL must use http or https, got '{}'", api.scheme()).into());
        }

        let ws = url::Url::parse(&self.ws_url)
            .map_err(|e| format!("Invalid WebSocket URL '{}': {e}", self.ws_url))?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(format!("WebSocket URL must use ws or wss, got '{}'", ws.scheme()).into());
        }

        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be greater than 0".into());
        }
        if self.reconnection.backoff_multiplier < 1.0 {
            return Err("reconnect backoff_multiplier must be at least 1.0".into());
        }

        self.capture
            .validate()
            .map_err(|e| format!("Invalid capture configuration: {e}"))?;

        Ok(())
    }

    /// Check if an access token is configured
    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Session transport settings derived from this configuration
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            ws_url: self.ws_url.clone(),
            reconnection: self.reconnection.clone(),
            ping_interval_secs: self.ping_interval_secs,
        }
    }

    /// Orchestrator settings derived from this configuration
    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            transport: self.transport_config(),
            capture: self.capture.clone(),
            connect_timeout_secs: self.connect_timeout_secs,
        }
    }
}

/// `http(s)://host/...` becomes `ws(s)://host/...`; other schemes are kept.
pub fn derive_ws_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    }
}

/// Build a configuration from defaults, then environment, then YAML.
fn merge_config(yaml: Option<YamlConfig>) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let env = env::EnvConfig::load()?;
    let mut config = ClientConfig::default();

    // Environment layer
    if let Some(api_url) = env.api_url.clone() {
        config.api_url = api_url;
    }
    let mut ws_url = env.ws_url.clone();
    config.token = env.token.clone();
    if let Some(secs) = env.connect_timeout_secs {
        config.connect_timeout_secs = secs;
    }
    if let Some(attempts) = env.reconnect_max_attempts {
        config.reconnection.max_attempts = attempts;
    }
    if let Some(secs) = env.ping_interval_secs {
        config.ping_interval_secs = (secs > 0).then_some(secs);
    }
    if let Some(policy) = env.capture_policy {
        config.capture.policy = policy;
    }
    if let Some(threshold) = env.vad_threshold {
        config.capture.vad.volume_threshold = threshold;
    }

    // YAML layer
    if let Some(yaml) = yaml {
        if let Some(server) = yaml.server {
            if let Some(api_url) = server.api_url {
                config.api_url = api_url;
            }
            if server.ws_url.is_some() {
                ws_url = server.ws_url;
            }
        }

        if let Some(token) = yaml.auth.and_then(|auth| auth.token) {
            config.token = Some(token);
        }

        if let Some(transport) = yaml.transport {
            if let Some(secs) = transport.connect_timeout_secs {
                config.connect_timeout_secs = secs;
            }
            if let Some(secs) = transport.ping_interval_secs {
                config.ping_interval_secs = (secs > 0).then_some(secs);
            }
            if let Some(reconnect) = transport.reconnect {
                let target = &mut config.reconnection;
                if let Some(enabled) = reconnect.enabled {
                    target.enabled = enabled;
                }
                if let Some(max_attempts) = reconnect.max_attempts {
                    target.max_attempts = max_attempts;
                }
                if let Some(delay) = reconnect.initial_delay_ms {
                    target.initial_delay_ms = delay;
                }
                if let Some(delay) = reconnect.max_delay_ms {
                    target.max_delay_ms = delay;
                }
                if let Some(multiplier) = reconnect.backoff_multiplier {
                    target.backoff_multiplier = multiplier;
                }
                if let Some(jitter) = reconnect.jitter {
                    target.jitter = jitter;
                }
            }
        }

        if let Some(capture) = yaml.capture {
            if let Some(policy) = capture.policy {
                config.capture.policy = policy
                    .parse::<CapturePolicy>()
                    .map_err(|e| format!("Invalid capture.policy: {e}"))?;
            }
            if let Some(timeslice) = capture.timeslice_ms {
                config.capture.timeslice_ms = timeslice;
            }
            if let Some(spacing) = capture.flush_spacing_ms {
                config.capture.flush_spacing_ms = spacing;
            }
        }

        if let Some(vad) = yaml.vad {
            let target = &mut config.capture.vad;
            if let Some(enabled) = vad.enabled {
                target.enabled = enabled;
            }
            if let Some(threshold) = vad.volume_threshold {
                target.volume_threshold = threshold;
            }
            if let Some(frames) = vad.activation_frames {
                target.activation_frames = frames;
            }
            if let Some(frames) = vad.deactivation_frames {
                target.deactivation_frames = frames;
            }
            if let Some(segments) = vad.max_buffered_segments {
                target.max_buffered_segments = segments;
            }
        }
    }

    config.ws_url = ws_url
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|| derive_ws_url(&config.api_url));

    Ok(config)
}
