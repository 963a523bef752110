//! Base types for the conversation session transport.
//!
//! The transport multiplexes JSON control messages (text frames) and raw
//! audio (binary frames) over a single WebSocket per conversation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur in the session transport.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// No authentication token was available when connecting
    #[error("Authentication token missing")]
    AuthMissing,

    /// The WebSocket could not be opened
    #[error("Failed to open session transport: {0}")]
    OpenFailed(String),

    /// The session URL could not be built
    #[error("Invalid session URL: {0}")]
    InvalidUrl(String),

    /// An inbound text frame was not a valid control message
    #[error("Failed to parse control message: {0}")]
    MessageParseFailed(String),

    /// WebSocket protocol or I/O error on an open connection
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Operation requires an open connection
    #[error("Not connected")]
    NotConnected,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Configuration for automatic reconnection behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    /// Enable automatic reconnection on unexpected close.
    /// Default: true
    pub enabled: bool,

    /// Maximum number of reconnection attempts before giving up.
    /// Set to 0 for unlimited attempts.
    /// Default: 5
    pub max_attempts: u32,

    /// Delay before the first reconnection attempt (milliseconds).
    /// Default: 2000ms
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay (milliseconds).
    /// Default: 60000ms
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,

    /// Whether to add up to 25% jitter to each delay.
    /// Default: false
    pub jitter: bool,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 2000,
            max_delay_ms: 60000,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl ReconnectionConfig {
    /// Create a config with reconnection disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay in milliseconds before attempt `attempt` (1-indexed).
    ///
    /// With the defaults this is `2^attempt * 1000`: 2s, 4s, 8s, 16s, 32s.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;

        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = delay.min(self.max_delay_ms as f64);

        if self.jitter {
            let jitter_range = delay * 0.25;
            let jitter = rand_jitter(jitter_range);
            (delay + jitter).max(0.0) as u64
        } else {
            delay as u64
        }
    }

    /// Check if another reconnection attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }
}

/// Pseudo-random jitter in `-range..=range` from the system clock.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}

/// Configuration for a session transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Base WebSocket URL of the backend, e.g. `ws://localhost:9009`.
    pub ws_url: String,

    /// Reconnection policy for established sessions.
    #[serde(default)]
    pub reconnection: ReconnectionConfig,

    /// Interval for `ping` keepalive messages. `None` disables the heartbeat.
    #[serde(default)]
    pub ping_interval_secs: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:9009".to_string(),
            reconnection: ReconnectionConfig::default(),
            ping_interval_secs: Some(30),
        }
    }
}

impl TransportConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Default::default()
        }
    }

    /// Build the session URL for a conversation.
    ///
    /// Format: `{ws_url}/ws/chat/{conversation_id}?token={token}` with the
    /// token percent-encoded.
    pub fn session_url(&self, conversation_id: &str, token: &str) -> TransportResult<url::Url> {
        let mut url = url::Url::parse(self.ws_url.trim_end_matches('/'))
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", self.ws_url)))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme '{other}', expected ws or wss"
                )));
            }
        }

        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(self.ws_url.clone()))?
            .pop_if_empty()
            .extend(["ws", "chat", conversation_id]);
        url.query_pairs_mut().append_pair("token", token);

        Ok(url)
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a session transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Opening the initial connection
    Connecting,
    /// Socket open
    Connected,
    /// Waiting for or performing a reconnection attempt
    Reconnecting,
    /// Reconnection gave up
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}
