//! HTTP API client tests against a wiremock server.
//!
//! Run with: cargo test --test api_tests

use std::sync::Arc;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vocata_realtime::api::{
    ApiClient, ApiError, CharacterQuery, CreateConversationRequest, LoginRequest, SenderType,
};
use vocata_realtime::{CredentialProvider, TokenStore};

fn envelope(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": 200,
        "message": "success",
        "data": data
    }))
}

fn client(server: &MockServer, tokens: Arc<TokenStore>) -> ApiClient {
    assert_ok!(ApiClient::new(&server.uri(), tokens))
}

/// Login stores the returned token and later calls carry it as a bearer header
#[tokio::test]
async fn test_login_then_authorized_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/client/auth/login"))
        .and(body_json(json!({
            "loginName": "ann@example.com",
            "password": "secret",
            "rememberMe": true
        })))
        .respond_with(envelope(json!({
            "token": "tok-123",
            "expiresIn": 3600,
            "user": {"id": "7", "nickname": "Ann"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/client/conversations"))
        .and(header("Authorization", "Bearer tok-123"))
        .respond_with(envelope(json!([
            {
                "conversationUuid": "conv-1",
                "characterId": "3",
                "characterName": "Luna",
                "title": "Evening chat",
                "status": 0
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = Arc::new(TokenStore::new());
    let api = client(&server, tokens.clone());

    let login = api
        .login(&LoginRequest {
            login_name: "ann@example.com".to_string(),
            password: "secret".to_string(),
            remember_me: true,
        })
        .await
        .unwrap();
    assert_eq!(login.token, "tok-123");
    assert_eq!(
        login.user.and_then(|u| u.nickname).as_deref(),
        Some("Ann")
    );
    assert_eq!(tokens.token().as_deref(), Some("tok-123"));
    assert!(!tokens.is_expired());

    let conversations = api.list_conversations().await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].conversation_uuid, "conv-1");
    assert_eq!(conversations[0].character_name.as_deref(), Some("Luna"));
}

/// A non-success envelope code becomes a server error with its message
#[tokio::test]
async fn test_envelope_error_code() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/client/conversations"))
        .and(body_json(json!({"characterId": 42})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 40001,
            "message": "character not found",
            "data": null
        })))
        .mount(&server)
        .await;

    let api = client(&server, Arc::new(TokenStore::with_token("tok")));
    let result = api
        .create_conversation(&CreateConversationRequest {
            character_id: 42,
            title: None,
        })
        .await;

    match assert_err!(result) {
        ApiError::Server { code, message } => {
            assert_eq!(code, 40001);
            assert_eq!(message, "character not found");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

/// HTTP 401 and envelope code 401 both mean the login is gone
#[tokio::test]
async fn test_unauthorized_responses() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/client/conversations"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": 401,
            "message": "token expired"
        })))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/client/conversations/conv-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 401,
            "message": "please log in"
        })))
        .mount(&server)
        .await;

    let api = client(&server, Arc::new(TokenStore::with_token("stale")));

    match api.list_conversations().await {
        Err(ApiError::Unauthorized(message)) => assert_eq!(message, "token expired"),
        other => panic!("expected Unauthorized, got {other:?}"),
    }
    match api.delete_conversation("conv-9").await {
        Err(ApiError::Unauthorized(message)) => assert_eq!(message, "please log in"),
        other => panic!("expected Unauthorized, got {other:?}"),
    }
}

/// Other HTTP failures keep the status and body
#[tokio::test]
async fn test_http_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/client/conversations"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let api = client(&server, Arc::new(TokenStore::new()));
    match api.list_conversations().await {
        Err(ApiError::Http(message)) => {
            assert!(message.contains("503"));
            assert!(message.contains("maintenance"));
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

/// A success envelope without data is an empty list
#[tokio::test]
async fn test_null_data_is_empty_list() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/client/conversations"))
        .respond_with(envelope(json!(null)))
        .mount(&server)
        .await;

    let api = client(&server, Arc::new(TokenStore::new()));
    let conversations = api.list_conversations().await.unwrap();
    assert!(conversations.is_empty());
}

/// Recent and history queries pass their paging parameters
#[tokio::test]
async fn test_message_queries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/client/conversations/conv-1/messages/recent"))
        .and(query_param("limit", "20"))
        .respond_with(envelope(json!([
            {"messageUuid": "m-1", "senderType": 1, "contentType": 1, "textContent": "你好"},
            {"messageUuid": "m-2", "senderType": 2, "contentType": 1, "textContent": "你好呀"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/client/conversations/conv-1/messages/history"))
        .and(query_param("offset", "20"))
        .and(query_param("limit", "10"))
        .respond_with(envelope(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server, Arc::new(TokenStore::with_token("tok")));

    let recent = api.get_recent_messages("conv-1", Some(20)).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].sender(), Some(SenderType::User));
    assert_eq!(recent[1].sender(), Some(SenderType::Character));
    assert_eq!(recent[1].text_content.as_deref(), Some("你好呀"));

    let history = api
        .get_history_messages("conv-1", Some(20), Some(10))
        .await
        .unwrap();
    assert!(history.is_empty());
}

/// Title updates send the new title as JSON
#[tokio::test]
async fn test_update_title() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/client/conversations/conv-1/title"))
        .and(body_json(json!({"title": "Renamed"})))
        .respond_with(envelope(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server, Arc::new(TokenStore::with_token("tok")));
    assert_ok!(api.update_title("conv-1", "Renamed").await);
}

/// Public character listings need no token and decode the paged result
#[tokio::test]
async fn test_public_and_featured_characters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/open/character/list"))
        .and(query_param("pageNum", "2"))
        .and(query_param("pageSize", "5"))
        .and(query_param("orderBy", "chat_count"))
        .respond_with(envelope(json!({
            "pageNum": 2,
            "pageSize": 5,
            "total": 6,
            "totalPages": 2,
            "list": [
                {"id": "1968", "name": "Luna", "greeting": "晚上好", "chatCount": "1200"}
            ],
            "hasNext": false,
            "hasPrevious": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/open/character/featured"))
        .and(query_param("limit", "3"))
        .respond_with(envelope(json!([
            {"id": "1", "name": "Ada", "isFeatured": 1},
            {"id": "2", "name": "Kai", "isFeatured": 1}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server, Arc::new(TokenStore::new()));

    let page = api
        .list_public_characters(&CharacterQuery {
            page_num: 2,
            page_size: 5,
            order_by: Some("chat_count".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 6);
    assert!(page.has_previous);
    assert_eq!(page.list.len(), 1);
    assert_eq!(page.list[0].id, "1968");
    assert_eq!(page.list[0].greeting.as_deref(), Some("晚上好"));

    let featured = api.featured_characters(Some(3)).await.unwrap();
    let names: Vec<&str> = featured.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Ada", "Kai"]);
}

/// Character search is a client endpoint and carries the keyword and token
#[tokio::test]
async fn test_search_characters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/client/character/search"))
        .and(query_param("keyword", "侦探"))
        .and(query_param("pageNum", "1"))
        .and(header("Authorization", "Bearer tok"))
        .respond_with(envelope(json!({
            "pageNum": 1,
            "pageSize": 10,
            "total": 1,
            "totalPages": 1,
            "list": [{"id": "77", "name": "Holmes", "tagNames": ["mystery"]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/client/character/search"))
        .and(query_param("keyword", "nobody"))
        .respond_with(envelope(json!(null)))
        .mount(&server)
        .await;

    let api = client(&server, Arc::new(TokenStore::with_token("tok")));

    let found = api
        .search_characters(&CharacterQuery::search("侦探"))
        .await
        .unwrap();
    assert_eq!(found.list.len(), 1);
    assert_eq!(found.list[0].name, "Holmes");
    assert_eq!(
        found.list[0].tag_names.as_deref(),
        Some(&["mystery".to_string()][..])
    );

    let empty = api
        .search_characters(&CharacterQuery::search("nobody"))
        .await
        .unwrap();
    assert!(empty.list.is_empty());
    assert_eq!(empty.total, 0);
}

/// Logout clears the local token even when the server call fails
#[tokio::test]
async fn test_logout_clears_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/client/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let tokens = Arc::new(TokenStore::with_token("tok"));
    let api = client(&server, tokens.clone());

    assert_err!(api.logout().await);
    assert!(!tokens.has_token());
    assert!(tokens.token().is_none());
}
