//! VocaTa REST API: authentication, character browsing and conversation
//! management.
//!
//! Every response is wrapped in a `{code, message, data}` envelope; only
//! `code == 200` counts as success.

pub mod client;
pub mod types;

pub use client::{ApiClient, ApiError, ApiResult};
pub use types::{
    ApiResponse, CharacterQuery, CharacterResponse, ConversationResponse,
    CreateConversationRequest, LoginRequest, LoginResponse, MessageResponse, PageResult,
    RegisterRequest, SenderType, UserProfile,
};
