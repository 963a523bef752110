//! Conversation orchestrator types: states, errors, configuration and
//! host callbacks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::capture::{CaptureConfig, CaptureError};
use crate::core::transport::{ServerMessage, TransportConfig, TransportError};

// =============================================================================
// States
// =============================================================================

/// Lifecycle of a [`ConversationOrchestrator`](super::ConversationOrchestrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatState {
    #[default]
    Uninitialized,
    /// Socket opening or waiting for the server's confirmation
    Connecting,
    Connected,
    /// Connected with capture active
    Recording,
    /// `destroy()` was called; terminal
    Closed,
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatState::Uninitialized => write!(f, "uninitialized"),
            ChatState::Connecting => write!(f, "connecting"),
            ChatState::Connected => write!(f, "connected"),
            ChatState::Recording => write!(f, "recording"),
            ChatState::Closed => write!(f, "closed"),
        }
    }
}

/// Connection status reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChatError {
    /// No token in the credential store
    #[error("Not authenticated: no access token available")]
    AuthMissing,

    #[error("Failed to open session: {0}")]
    TransportOpenFailed(String),

    /// The server did not confirm the session in time
    #[error("Session not confirmed within {0:?}")]
    TransportTimeout(Duration),

    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Audio capture failed: {0}")]
    CaptureFailed(#[from] CaptureError),

    #[error("Not connected")]
    NotConnected,

    #[error("Operation not allowed in state {0}")]
    InvalidState(ChatState),

    #[error("Conversation has been closed")]
    Closed,
}

impl ChatError {
    /// Whether the failure came from the microphone side.
    pub fn is_capture_failure(&self) -> bool {
        matches!(self, ChatError::CaptureFailed(_))
    }

    /// Whether the user refused microphone access.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ChatError::CaptureFailed(CaptureError::DeviceDenied(_)))
    }
}

impl From<TransportError> for ChatError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::AuthMissing => ChatError::AuthMissing,
            TransportError::NotConnected => ChatError::NotConnected,
            TransportError::OpenFailed(reason)
            | TransportError::InvalidUrl(reason)
            | TransportError::WebSocket(reason)
            | TransportError::MessageParseFailed(reason) => ChatError::TransportOpenFailed(reason),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub transport: TransportConfig,
    pub capture: CaptureConfig,
    /// Time allowed for the server to confirm the session
    pub connect_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            capture: CaptureConfig::default(),
            connect_timeout_secs: 10,
        }
    }
}

impl ChatConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Every inbound control message.
pub type MessageCallback = Arc<dyn Fn(&ServerMessage) + Send + Sync>;

/// Recognized user speech: `(text, is_final)`.
pub type SttResultCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Streamed reply: `(accumulated_text, is_complete, character_name)`.
pub type LlmStreamCallback = Arc<dyn Fn(&str, bool, Option<&str>) + Send + Sync>;

/// Playback started (`true`) or went idle (`false`).
pub type AudioPlayCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Connection status changes with a human-readable detail.
pub type ConnectionStatusCallback = Arc<dyn Fn(ConnectionStatus, &str) + Send + Sync>;

/// Host callbacks. Unset callbacks are skipped.
#[derive(Clone, Default)]
pub struct ChatCallbacks {
    pub on_message: Option<MessageCallback>,
    pub on_stt_result: Option<SttResultCallback>,
    pub on_llm_stream: Option<LlmStreamCallback>,
    pub on_audio_play: Option<AudioPlayCallback>,
    pub on_connection_status: Option<ConnectionStatusCallback>,
}

impl fmt::Debug for ChatCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCallbacks")
            .field("on_message", &self.on_message.is_some())
            .field("on_stt_result", &self.on_stt_result.is_some())
            .field("on_llm_stream", &self.on_llm_stream.is_some())
            .field("on_audio_play", &self.on_audio_play.is_some())
            .field("on_connection_status", &self.on_connection_status.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(ChatError::from(TransportError::AuthMissing), ChatError::AuthMissing);
        assert_eq!(
            ChatError::from(TransportError::OpenFailed("refused".into())),
            ChatError::TransportOpenFailed("refused".into())
        );
        assert_eq!(
            ChatError::from(TransportError::NotConnected),
            ChatError::NotConnected
        );
    }

    #[test]
    fn test_capture_error_helpers() {
        let denied = ChatError::from(CaptureError::DeviceDenied("no".into()));
        assert!(denied.is_capture_failure());
        assert!(denied.is_permission_denied());

        let busy = ChatError::from(CaptureError::Busy);
        assert!(busy.is_capture_failure());
        assert!(!busy.is_permission_denied());
        assert!(!ChatError::NotConnected.is_capture_failure());
    }

    #[test]
    fn test_chat_config_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.capture.timeslice_ms, 200);
        assert_eq!(ChatState::default().to_string(), "uninitialized");
        assert_eq!(
            ChatError::InvalidState(ChatState::Closed).to_string(),
            "Operation not allowed in state closed"
        );
    }
}
