//! Session transport tests against a mock backend.
//!
//! Run with: cargo test --test session_transport_tests

mod mock_server;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use mock_server::{MockSessionServer, Received, Script, binary_frame, text_frame};
use vocata_realtime::{
    ConnectionState, ControlKind, ReconnectionConfig, SessionTransport, StaticToken,
    Subscription, TransportConfig, TransportError, TransportEvent, TransportEventKind,
};

// =============================================================================
// Helpers
// =============================================================================

fn config_for(server: &MockSessionServer) -> TransportConfig {
    TransportConfig {
        ws_url: server.ws_url(),
        reconnection: ReconnectionConfig::disabled(),
        ping_interval_secs: None,
    }
}

fn transport(config: TransportConfig, token: &str) -> SessionTransport {
    SessionTransport::new(config, Arc::new(StaticToken::new(token)))
}

/// Record every event of the given kinds, in emission order.
fn record(
    transport: &SessionTransport,
    kinds: &[TransportEventKind],
) -> (Arc<Mutex<Vec<TransportEvent>>>, Vec<Subscription>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriptions = kinds
        .iter()
        .map(|kind| {
            let events = events.clone();
            transport.subscribe(*kind, move |event| events.lock().push(event.clone()))
        })
        .collect();
    (events, subscriptions)
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// =============================================================================
// Tests
// =============================================================================

/// The session URL carries the conversation id in the path and the token in the query
#[tokio::test]
async fn test_session_url_carries_conversation_and_token() {
    let server = MockSessionServer::start(Script::established()).await;
    let transport = transport(config_for(&server), "abc123");

    transport.connect("conv-1").await.unwrap();

    assert!(transport.is_connected());
    assert_eq!(transport.connection_state(), ConnectionState::Connected);
    assert_eq!(transport.conversation_id().as_deref(), Some("conv-1"));
    assert_eq!(server.request_uris(), vec!["/ws/chat/conv-1?token=abc123"]);

    transport.disconnect();
}

/// Outbound control messages and audio reach the server in call order
#[tokio::test]
async fn test_outbound_frames_keep_order() {
    let server = MockSessionServer::start(Script::established()).await;
    let transport = transport(config_for(&server), "tok");
    transport.connect("conv-1").await.unwrap();

    assert!(transport.send_text("你好"));
    assert!(transport.send_control(ControlKind::AudioStart));
    assert!(transport.send_audio(vec![1u8, 2, 3].into()));
    assert!(transport.send_control(ControlKind::AudioEnd));

    let received = server.wait_for(|frames| frames.len() >= 4).await;
    assert_eq!(
        received,
        vec![
            Received::Control(json!({"type": "text_message", "data": {"message": "你好"}})),
            Received::Control(json!({"type": "audio_start"})),
            Received::Audio(vec![1, 2, 3]),
            Received::Control(json!({"type": "audio_end"})),
        ]
    );

    transport.disconnect();
}

/// Control messages and binary frames are delivered in arrival order
#[tokio::test]
async fn test_inbound_frames_delivered_in_order() {
    let script = Script::established().with_frames(vec![
        text_frame(json!({"type": "tts_audio_meta", "audioSize": 6, "format": "mp3"})),
        binary_frame(vec![1, 1]),
        binary_frame(vec![2, 2]),
        binary_frame(vec![3, 3]),
        text_frame(json!({"type": "complete", "message": "done"})),
    ]);
    let server = MockSessionServer::start(script).await;
    let transport = transport(config_for(&server), "tok");

    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let log_messages = log.clone();
    let _messages = transport.subscribe(TransportEventKind::Message, move |event| {
        if let TransportEvent::Message(message) = event {
            log_messages.lock().push(message.kind().to_string());
        }
    });
    let log_audio = log.clone();
    let _audio = transport.subscribe(TransportEventKind::AudioData, move |event| {
        if let TransportEvent::AudioData(data) = event {
            log_audio.lock().push(format!("audio:{}", data[0]));
        }
    });

    transport.connect("conv-1").await.unwrap();
    wait_until(|| log.lock().len() >= 6).await;

    assert_eq!(
        *log.lock(),
        vec![
            "status",
            "tts_audio_meta",
            "audio:1",
            "audio:2",
            "audio:3",
            "complete"
        ]
    );

    transport.disconnect();
}

/// Unknown or malformed text frames are skipped without closing the session
#[tokio::test]
async fn test_unparseable_frames_are_skipped() {
    let script = Script::established().with_frames(vec![
        Message::Text("not json".to_string().into()),
        text_frame(json!({"type": "brand_new_type", "x": 1})),
        text_frame(json!({"type": "pong"})),
    ]);
    let server = MockSessionServer::start(script).await;
    let transport = transport(config_for(&server), "tok");
    let (events, _subs) = record(&transport, &[TransportEventKind::Message]);

    transport.connect("conv-1").await.unwrap();
    wait_until(|| events.lock().len() >= 3).await;

    let kinds: Vec<&str> = events
        .lock()
        .iter()
        .map(|event| match event {
            TransportEvent::Message(message) => message.kind(),
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["status", "unknown", "pong"]);
    assert!(transport.is_connected());

    transport.disconnect();
}

/// A configured heartbeat sends `ping` control messages
#[tokio::test]
async fn test_heartbeat_sends_ping() {
    let server = MockSessionServer::start(Script::established()).await;
    let mut config = config_for(&server);
    config.ping_interval_secs = Some(1);
    let transport = transport(config, "tok");

    transport.connect("conv-1").await.unwrap();

    let received = server
        .wait_for(|frames| frames.iter().any(|f| f.control_type() == Some("ping")))
        .await;
    assert_eq!(received[0], Received::Control(json!({"type": "ping"})));

    transport.disconnect();
}

/// After an unexpected close, reconnection backs off and gives up after max_attempts
#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let script = Script::established().closing().max_connections(1);
    let server = MockSessionServer::start(script).await;
    let mut config = config_for(&server);
    config.reconnection = ReconnectionConfig {
        enabled: true,
        max_attempts: 2,
        initial_delay_ms: 20,
        max_delay_ms: 1000,
        backoff_multiplier: 2.0,
        jitter: false,
    };
    let transport = transport(config, "tok");
    let (events, _subs) = record(
        &transport,
        &[
            TransportEventKind::Disconnected,
            TransportEventKind::Reconnecting,
            TransportEventKind::ReconnectFailed,
        ],
    );

    transport.connect("conv-1").await.unwrap();
    wait_until(|| {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, TransportEvent::ReconnectFailed { .. }))
    })
    .await;

    // A third attempt would have started 80 ms after the second failed.
    let seen = events.lock().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(events.lock().len(), seen);

    let events = events.lock().clone();
    assert!(matches!(events[0], TransportEvent::Disconnected { .. }));
    let attempts: Vec<(u32, Duration)> = events
        .iter()
        .filter_map(|e| match e {
            TransportEvent::Reconnecting { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
        .collect();
    assert_eq!(
        attempts,
        vec![(1, Duration::from_millis(20)), (2, Duration::from_millis(40))]
    );
    assert!(matches!(
        events.last(),
        Some(TransportEvent::ReconnectFailed { attempts: 2 })
    ));

    assert_eq!(transport.connection_state(), ConnectionState::Failed);
    assert!(!transport.is_connected());
    assert!(!transport.send_text("lost"));
    assert_eq!(server.connection_count(), 1);
}

/// A server-side close followed by a successful reconnect restores the session
#[tokio::test]
async fn test_reconnect_restores_session() {
    let script = Script::established().closing();
    let server = MockSessionServer::start(script).await;
    let mut config = config_for(&server);
    config.reconnection = ReconnectionConfig {
        initial_delay_ms: 10,
        ..ReconnectionConfig::default()
    };
    let transport = transport(config, "tok");
    let (events, _subs) = record(
        &transport,
        &[TransportEventKind::Connected, TransportEventKind::Reconnecting],
    );

    transport.connect("conv-1").await.unwrap();
    wait_until(|| server.connection_count() >= 2).await;
    wait_until(|| {
        events
            .lock()
            .iter()
            .filter(|e| matches!(e, TransportEvent::Connected))
            .count()
            >= 2
    })
    .await;
    transport.disconnect();

    let events = events.lock().clone();
    assert!(matches!(events[0], TransportEvent::Connected));
    assert!(matches!(
        events[1],
        TransportEvent::Reconnecting { attempt: 1, .. }
    ));
    assert!(matches!(events[2], TransportEvent::Connected));
    assert_eq!(
        server.request_uris()[0..2],
        ["/ws/chat/conv-1?token=tok", "/ws/chat/conv-1?token=tok"]
    );
}

/// A client disconnect closes the session without scheduling a reconnect
#[tokio::test]
async fn test_disconnect_does_not_reconnect() {
    let server = MockSessionServer::start(Script::established()).await;
    let mut config = config_for(&server);
    config.reconnection = ReconnectionConfig {
        initial_delay_ms: 10,
        ..ReconnectionConfig::default()
    };
    let transport = transport(config, "tok");
    let (events, _subs) = record(
        &transport,
        &[
            TransportEventKind::Disconnected,
            TransportEventKind::Reconnecting,
        ],
    );

    transport.connect("conv-1").await.unwrap();
    transport.disconnect();
    transport.disconnect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = events.lock().clone();
    assert_eq!(events.len(), 1);
    match &events[0] {
        TransportEvent::Disconnected { code, reason } => {
            assert_eq!(*code, Some(1000));
            assert_eq!(reason, "client disconnect");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
    assert!(!transport.send_control(ControlKind::Ping));
    assert_eq!(server.connection_count(), 1);
}

/// A refused initial connect fails without entering the reconnect loop
#[tokio::test]
async fn test_initial_connect_failure_does_not_retry() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = TransportConfig {
        ws_url: format!("ws://{addr}"),
        reconnection: ReconnectionConfig {
            initial_delay_ms: 10,
            ..ReconnectionConfig::default()
        },
        ping_interval_secs: None,
    };
    let transport = transport(config, "tok");
    let (events, _subs) = record(
        &transport,
        &[TransportEventKind::Error, TransportEventKind::Reconnecting],
    );

    let result = transport.connect("conv-1").await;
    assert!(matches!(result, Err(TransportError::OpenFailed(_))));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = events.lock().clone();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        TransportEvent::Error(TransportError::OpenFailed(_))
    ));
    assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
}
