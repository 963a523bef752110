//! Request and response bodies of the VocaTa HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope around every API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// Envelope code for success.
pub const CODE_SUCCESS: i64 = 200;
/// Envelope code for a missing or expired login.
pub const CODE_UNAUTHORIZED: i64 = 401;

// =============================================================================
// Auth
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Email or nickname
    pub login_name: String,
    pub password: String,
    pub remember_me: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginResponse {
    pub token: String,
    /// Token lifetime in seconds; non-positive means no expiry
    pub expires_in: Option<i64>,
    pub user: Option<UserProfile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub id: Option<String>,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub nickname: String,
    pub password: String,
    pub email: String,
    pub confirm_password: String,
    pub verification_code: String,
    /// 0 unknown, 1 male, 2 female
    pub gender: i32,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SendCodeRequest<'a> {
    pub email: &'a str,
}

// =============================================================================
// Conversations
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub character_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct UpdateTitleRequest<'a> {
    pub title: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationResponse {
    pub conversation_uuid: String,
    pub character_id: Option<String>,
    pub character_name: Option<String>,
    pub character_avatar_url: Option<String>,
    pub title: Option<String>,
    pub last_message_summary: Option<String>,
    pub status: Option<i32>,
    pub create_date: Option<String>,
    pub update_date: Option<String>,
}

// =============================================================================
// Characters
// =============================================================================

/// Filter and paging for character listings and search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    pub page_num: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_direction: Option<String>,
}

impl Default for CharacterQuery {
    fn default() -> Self {
        Self {
            keyword: None,
            page_num: 1,
            page_size: 10,
            language: None,
            order_by: None,
            order_direction: None,
        }
    }
}

impl CharacterQuery {
    pub fn search(keyword: impl Into<String>) -> Self {
        Self {
            keyword: Some(keyword.into()),
            ..Default::default()
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageResult<T> {
    pub page_num: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u32,
    pub list: Vec<T>,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Default for PageResult<T> {
    fn default() -> Self {
        Self {
            page_num: 1,
            page_size: 0,
            total: 0,
            total_pages: 0,
            list: Vec::new(),
            has_next: false,
            has_previous: false,
        }
    }
}

/// A character as listed. Ids and counters arrive as strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CharacterResponse {
    pub id: String,
    pub character_code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub greeting: Option<String>,
    pub avatar_url: Option<String>,
    pub language: Option<String>,
    pub is_featured: Option<i32>,
    pub is_official: Option<i32>,
    pub chat_count: Option<String>,
    pub tag_names: Option<Vec<String>>,
}

/// Who sent a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderType {
    User,
    Character,
    Other(i32),
}

impl From<i32> for SenderType {
    fn from(value: i32) -> Self {
        match value {
            1 => SenderType::User,
            2 => SenderType::Character,
            other => SenderType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageResponse {
    pub message_uuid: String,
    pub sender_type: Option<i32>,
    pub content_type: Option<i32>,
    pub text_content: Option<String>,
    pub audio_url: Option<String>,
    pub llm_model_id: Option<String>,
    pub tts_voice_id: Option<String>,
    pub metadata: Option<Value>,
    pub create_date: Option<String>,
}

impl MessageResponse {
    pub fn sender(&self) -> Option<SenderType> {
        self.sender_type.map(SenderType::from)
    }
}
