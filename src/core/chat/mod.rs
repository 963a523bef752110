//! Conversation orchestration: one session, its microphone and its speaker.

pub mod base;
pub mod orchestrator;

pub use base::{
    AudioPlayCallback, ChatCallbacks, ChatConfig, ChatError, ChatResult, ChatState,
    ConnectionStatus, ConnectionStatusCallback, LlmStreamCallback, MessageCallback,
    SttResultCallback,
};
pub use orchestrator::ConversationOrchestrator;
