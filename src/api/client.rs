//! HTTP client for the VocaTa REST API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::types::{
    ApiResponse, CODE_SUCCESS, CODE_UNAUTHORIZED, CharacterQuery, CharacterResponse,
    ConversationResponse, CreateConversationRequest, LoginRequest, LoginResponse,
    MessageResponse, PageResult, RegisterRequest, SendCodeRequest, UpdateTitleRequest,
};
use crate::auth::{CredentialProvider, TokenStore};

/// Default request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Endpoints for logged-in users.
const CLIENT_SCOPE: &str = "client";
/// Public endpoints.
const OPEN_SCOPE: &str = "open";

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    /// Network failure or non-envelope HTTP error
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Missing, invalid or expired token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The envelope carried a non-success code
    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },

    /// The response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// A successful envelope had no `data`
    #[error("Response contained no data")]
    MissingData,

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Http(err.to_string())
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// REST client sharing its token store with the session transport.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: url::Url,
    tokens: Arc<TokenStore>,
}

impl ApiClient {
    pub fn new(base_url: &str, tokens: Arc<TokenStore>) -> ApiResult<Self> {
        let base_url = url::Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                base_url.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            tokens,
        })
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    // =========================================================================
    // Auth
    // =========================================================================

    /// Log in and store the returned token.
    pub async fn login(&self, request: &LoginRequest) -> ApiResult<LoginResponse> {
        let response: LoginResponse = self
            .send_expect(self.request(Method::POST, &["auth", "login"])?.json(request))
            .await?;

        if response.token.is_empty() {
            return Err(ApiError::Decode("login response has no token".to_string()));
        }

        let ttl = response
            .expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64));
        self.tokens.set_token(response.token.clone(), ttl);
        tracing::info!("Logged in as {}", request.login_name);

        Ok(response)
    }

    pub async fn register(&self, request: &RegisterRequest) -> ApiResult<()> {
        self.send_unit(self.request(Method::POST, &["auth", "register"])?.json(request))
            .await
    }

    /// Ask the server to email a verification code.
    pub async fn send_code(&self, email: &str) -> ApiResult<()> {
        self.send_unit(
            self.request(Method::POST, &["auth", "sendCode"])?
                .json(&SendCodeRequest { email }),
        )
        .await
    }

    /// Log out. The local token is cleared even when the call fails.
    pub async fn logout(&self) -> ApiResult<()> {
        let result = self
            .send_unit(self.request(Method::POST, &["auth", "logout"])?)
            .await;
        self.tokens.clear();
        tracing::info!("Logged out");
        result
    }

    // =========================================================================
    // Characters
    // =========================================================================

    /// Published characters, one page at a time. No login needed.
    pub async fn list_public_characters(
        &self,
        query: &CharacterQuery,
    ) -> ApiResult<PageResult<CharacterResponse>> {
        self.send_optional(
            self.request_in(OPEN_SCOPE, Method::GET, &["character", "list"])?
                .query(query),
        )
        .await
        .map(Option::unwrap_or_default)
    }

    pub async fn featured_characters(
        &self,
        limit: Option<u32>,
    ) -> ApiResult<Vec<CharacterResponse>> {
        let mut request = self.request_in(OPEN_SCOPE, Method::GET, &["character", "featured"])?;
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        self.send_optional(request)
            .await
            .map(Option::unwrap_or_default)
    }

    /// Search published characters by keyword.
    pub async fn search_characters(
        &self,
        query: &CharacterQuery,
    ) -> ApiResult<PageResult<CharacterResponse>> {
        self.send_optional(self.request(Method::GET, &["character", "search"])?.query(query))
            .await
            .map(Option::unwrap_or_default)
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    pub async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> ApiResult<ConversationResponse> {
        self.send_expect(self.request(Method::POST, &["conversations"])?.json(request))
            .await
    }

    pub async fn list_conversations(&self) -> ApiResult<Vec<ConversationResponse>> {
        self.send_optional(self.request(Method::GET, &["conversations"])?)
            .await
            .map(Option::unwrap_or_default)
    }

    pub async fn delete_conversation(&self, conversation_uuid: &str) -> ApiResult<()> {
        self.send_unit(self.request(Method::DELETE, &["conversations", conversation_uuid])?)
            .await
    }

    pub async fn update_title(&self, conversation_uuid: &str, title: &str) -> ApiResult<()> {
        self.send_unit(
            self.request(Method::PUT, &["conversations", conversation_uuid, "title"])?
                .json(&UpdateTitleRequest { title }),
        )
        .await
    }

    /// Latest messages of a conversation, oldest first.
    pub async fn get_recent_messages(
        &self,
        conversation_uuid: &str,
        limit: Option<u32>,
    ) -> ApiResult<Vec<MessageResponse>> {
        let mut request = self.request(
            Method::GET,
            &["conversations", conversation_uuid, "messages", "recent"],
        )?;
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        self.send_optional(request)
            .await
            .map(Option::unwrap_or_default)
    }

    /// Older messages for paging backwards through history.
    pub async fn get_history_messages(
        &self,
        conversation_uuid: &str,
        offset: Option<u32>,
        limit: Option<u32>,
    ) -> ApiResult<Vec<MessageResponse>> {
        let mut request = self.request(
            Method::GET,
            &["conversations", conversation_uuid, "messages", "history"],
        )?;
        if let Some(offset) = offset {
            request = request.query(&[("offset", offset)]);
        }
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        self.send_optional(request)
            .await
            .map(Option::unwrap_or_default)
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn request(&self, method: Method, segments: &[&str]) -> ApiResult<RequestBuilder> {
        self.request_in(CLIENT_SCOPE, method, segments)
    }

    /// `{base}/api/{scope}/{segments...}` with the bearer token when present.
    fn request_in(
        &self,
        scope: &str,
        method: Method,
        segments: &[&str],
    ) -> ApiResult<RequestBuilder> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", scope])
            .extend(segments);

        tracing::debug!("{} {}", method, url);
        let mut request = self.http.request(method, url);
        if let Some(token) = self.tokens.token() {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        Ok(request)
    }

    async fn send_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> ApiResult<Option<T>> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Unauthorized(unauthorized_detail(&body)));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiError::Http(format!("HTTP {status}: {body}")));
        }

        let body = response.text().await?;
        let envelope: ApiResponse<T> =
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))?;

        match envelope.code {
            CODE_SUCCESS => Ok(envelope.data),
            CODE_UNAUTHORIZED => Err(ApiError::Unauthorized(envelope.message)),
            code => {
                tracing::warn!("API returned code {}: {}", code, envelope.message);
                Err(ApiError::Server {
                    code,
                    message: envelope.message,
                })
            }
        }
    }

    async fn send_expect<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        self.send_optional(request)
            .await?
            .ok_or(ApiError::MissingData)
    }

    async fn send_unit(&self, request: RequestBuilder) -> ApiResult<()> {
        self.send_optional::<serde_json::Value>(request)
            .await
            .map(|_| ())
    }
}

/// Message from a 401 body, which may or may not be an envelope.
fn unauthorized_detail(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct Partial {
        #[serde(default)]
        message: String,
    }

    serde_json::from_str::<Partial>(body)
        .ok()
        .map(|p| p.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "login required".to_string())
}
