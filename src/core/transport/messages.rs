//! Control messages exchanged over the session WebSocket.
//!
//! Every text frame is a JSON object with a `type` discriminator. Binary
//! frames carry raw audio and never go through these types.
//!
//! Client messages (sent to server):
//! - text_message - User text input
//! - audio_start - An utterance begins; binary audio follows
//! - audio_end - The utterance is complete
//! - ping - Keepalive
//!
//! Server messages (received from server):
//! - stt_result - Transcript of the user's speech (partial or final)
//! - llm_text_stream - Incremental assistant text
//! - tts_audio_meta - Metadata announcing synthesized audio
//! - tts_result - Synthesized audio summary
//! - complete - The assistant turn is finished
//! - error - Server-side failure
//! - status - Informational status (e.g. connection established)
//! - pong - Keepalive reply

use serde::{Deserialize, Serialize};

// =============================================================================
// Client Messages
// =============================================================================

/// Payload of a `text_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub message: String,
}

/// Messages sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// User text input
    #[serde(rename = "text_message")]
    TextMessage { data: TextPayload },

    /// Start of an audio utterance
    #[serde(rename = "audio_start")]
    AudioStart,

    /// End of an audio utterance
    #[serde(rename = "audio_end")]
    AudioEnd,

    /// Keepalive
    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    /// Create a text message.
    pub fn text(message: impl Into<String>) -> Self {
        ClientMessage::TextMessage {
            data: TextPayload {
                message: message.into(),
            },
        }
    }
}

/// Control signals that carry no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    AudioStart,
    AudioEnd,
    Ping,
}

impl From<ControlKind> for ClientMessage {
    fn from(kind: ControlKind) -> Self {
        match kind {
            ControlKind::AudioStart => ClientMessage::AudioStart,
            ControlKind::AudioEnd => ClientMessage::AudioEnd,
            ControlKind::Ping => ClientMessage::Ping,
        }
    }
}

impl std::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlKind::AudioStart => write!(f, "audio_start"),
            ControlKind::AudioEnd => write!(f, "audio_end"),
            ControlKind::Ping => write!(f, "ping"),
        }
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// Messages received from the server.
///
/// Unknown `type` values deserialize to [`ServerMessage::Unknown`] so newer
/// servers do not break older clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Speech recognition result for the user's audio
    #[serde(rename = "stt_result", rename_all = "camelCase")]
    SttResult {
        #[serde(default)]
        text: String,
        #[serde(default)]
        is_final: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Incremental assistant text
    #[serde(rename = "llm_text_stream", rename_all = "camelCase")]
    LlmTextStream {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        character_name: Option<String>,
        #[serde(default)]
        is_complete: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Announces synthesized audio; binary frames follow
    #[serde(rename = "tts_audio_meta", rename_all = "camelCase")]
    TtsAudioMeta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_rate: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channels: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bit_depth: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Synthesis summary for a chunk of assistant text
    #[serde(rename = "tts_result", rename_all = "camelCase")]
    TtsResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_rate: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// The assistant turn is complete
    #[serde(rename = "complete")]
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Server-side failure
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Informational status
    #[serde(rename = "status")]
    Status {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Keepalive reply
    #[serde(rename = "pong")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Any message type this client does not know
    #[serde(other)]
    Unknown,
}

/// Marker the server puts in the status message sent right after the socket opens.
pub const CONNECTION_ESTABLISHED_MARKER: &str = "连接已建立";

impl ServerMessage {
    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::SttResult { .. } => "stt_result",
            ServerMessage::LlmTextStream { .. } => "llm_text_stream",
            ServerMessage::TtsAudioMeta { .. } => "tts_audio_meta",
            ServerMessage::TtsResult { .. } => "tts_result",
            ServerMessage::Complete { .. } => "complete",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Status { .. } => "status",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Unknown => "unknown",
        }
    }

    /// Whether this message proves the server side of the session is live.
    ///
    /// True for a status carrying the connection-established marker and for
    /// any streamed transcript or assistant text.
    pub fn confirms_connection(&self) -> bool {
        match self {
            ServerMessage::Status { message, .. } => {
                message.contains(CONNECTION_ESTABLISHED_MARKER)
            }
            ServerMessage::SttResult { .. } | ServerMessage::LlmTextStream { .. } => true,
            _ => false,
        }
    }

    /// Human-readable reason of an `error` message.
    pub fn error_reason(&self) -> Option<&str> {
        match self {
            ServerMessage::Error { error, message, .. } => {
                if !error.is_empty() {
                    Some(error.as_str())
                } else {
                    Some(message.as_deref().unwrap_or("unknown server error"))
                }
            }
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
