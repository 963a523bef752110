//! WebSocket session transport.
//!
//! One [`SessionTransport`] owns at most one socket to
//! `{ws_url}/ws/chat/{conversation_id}?token=...`. A background task reads
//! the socket, demultiplexes text and binary frames into [`TransportEvent`]s,
//! writes queued outbound frames, and reconnects with exponential backoff when
//! the socket closes without `disconnect()` having been called.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vocata_realtime::{SessionTransport, TransportConfig, TransportEventKind, TokenStore};
//!
//! let transport = SessionTransport::new(
//!     TransportConfig::new("ws://localhost:9009"),
//!     Arc::new(TokenStore::with_token("jwt")),
//! );
//! let _sub = transport.subscribe(TransportEventKind::Message, |event| {
//!     println!("{:?}", event);
//! });
//! transport.connect("conv-1").await?;
//! transport.send_text("hello");
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::base::{ConnectionState, TransportConfig, TransportError, TransportResult};
use super::events::{EventBus, Subscription, TransportEvent, TransportEventKind};
use super::messages::{ClientMessage, ControlKind, ServerMessage};
use crate::auth::CredentialProvider;

/// Channel capacity for outbound WebSocket frames.
const WS_CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Outbound frame queued for the connection task.
#[derive(Debug)]
enum Outbound {
    Control(ClientMessage),
    Audio(Bytes),
}

// =============================================================================
// Session Transport
// =============================================================================

/// WebSocket transport for one conversation session.
///
/// # Thread Safety
///
/// All mutable state sits behind `Arc` so it can be shared with the spawned
/// connection task. Event handlers run on that task, in frame order.
pub struct SessionTransport {
    config: TransportConfig,
    credentials: Arc<dyn CredentialProvider>,
    events: EventBus,
    state: Arc<RwLock<ConnectionState>>,
    /// Socket-open flag for lock-free checks
    connected: Arc<AtomicBool>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<Outbound>>>>,
    conversation_id: RwLock<Option<String>>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    /// Suppresses reconnection once `disconnect()` has been called
    intentional_disconnect: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU32>,
}

/// State shared between the transport handle and its connection task.
struct ConnectionContext {
    config: TransportConfig,
    credentials: Arc<dyn CredentialProvider>,
    events: EventBus,
    state: Arc<RwLock<ConnectionState>>,
    connected: Arc<AtomicBool>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<Outbound>>>>,
    intentional_disconnect: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU32>,
    conversation_id: String,
}

impl SessionTransport {
    pub fn new(config: TransportConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            config,
            credentials,
            events: EventBus::new(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            ws_sender: Arc::new(Mutex::new(None)),
            conversation_id: RwLock::new(None),
            connection_handle: Mutex::new(None),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Event bus of this transport.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Shorthand for `events().subscribe(kind, handler)`.
    #[must_use = "dropping a Subscription unsubscribes the handler"]
    pub fn subscribe<F>(&self, kind: TransportEventKind, handler: F) -> Subscription
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Open the session socket for `conversation_id`.
    ///
    /// Fails without touching the network when no token is available. Any
    /// failure is also emitted as a [`TransportEvent::Error`].
    pub async fn connect(&self, conversation_id: &str) -> TransportResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);

        let Some(token) = self.credentials.token() else {
            tracing::warn!("No token available, not connecting conversation {}", conversation_id);
            return Err(self.fail(TransportError::AuthMissing));
        };

        let url = match self.config.session_url(conversation_id, &token) {
            Ok(url) => url,
            Err(e) => return Err(self.fail(e)),
        };

        *self.state.write() = ConnectionState::Connecting;
        *self.conversation_id.write() = Some(conversation_id.to_string());
        tracing::info!("Connecting session transport for conversation {}", conversation_id);

        let (ws_stream, _response) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(pair) => pair,
            Err(e) => {
                *self.state.write() = ConnectionState::Disconnected;
                return Err(self.fail(TransportError::OpenFailed(e.to_string())));
            }
        };

        // A disconnect may have raced the handshake.
        if self.intentional_disconnect.load(Ordering::SeqCst) {
            *self.state.write() = ConnectionState::Disconnected;
            return Err(TransportError::NotConnected);
        }

        tracing::info!("Session transport connected for conversation {}", conversation_id);

        let (ws_sink, ws_source) = ws_stream.split();
        let (tx, rx) = mpsc::channel::<Outbound>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock() = Some(tx);

        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connected;
        self.events.emit(&TransportEvent::Connected);

        let ctx = ConnectionContext {
            config: self.config.clone(),
            credentials: self.credentials.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            connected: self.connected.clone(),
            ws_sender: self.ws_sender.clone(),
            intentional_disconnect: self.intentional_disconnect.clone(),
            reconnect_attempts: self.reconnect_attempts.clone(),
            conversation_id: conversation_id.to_string(),
        };

        let handle = tokio::spawn(run_connection(ctx, ws_sink, ws_source, rx));
        if let Some(previous) = self.connection_handle.lock().replace(handle) {
            previous.abort();
        }

        Ok(())
    }

    /// Close the socket and cancel any pending reconnection. Idempotent.
    pub fn disconnect(&self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);

        *self.ws_sender.lock() = None;

        if let Some(handle) = self.connection_handle.lock().take() {
            handle.abort();
        }

        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Disconnected;

        if was_connected {
            tracing::info!("Session transport disconnected");
            self.events.emit(&TransportEvent::Disconnected {
                code: Some(1000),
                reason: "client disconnect".to_string(),
            });
        }
    }

    /// Send a user text message. Dropped when the socket is not open.
    pub fn send_text(&self, text: &str) -> bool {
        self.enqueue(Outbound::Control(ClientMessage::text(text)))
    }

    /// Send a binary audio frame. Dropped when the socket is not open.
    pub fn send_audio(&self, data: Bytes) -> bool {
        self.enqueue(Outbound::Audio(data))
    }

    /// Send a payload-free control message. Dropped when the socket is not open.
    pub fn send_control(&self, kind: ControlKind) -> bool {
        self.enqueue(Outbound::Control(kind.into()))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.conversation_id.read().clone()
    }

    /// Reconnection attempts made since the socket was last open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    fn enqueue(&self, frame: Outbound) -> bool {
        if !self.is_connected() {
            tracing::debug!("Socket not open, dropping outbound frame");
            return false;
        }

        let guard = self.ws_sender.lock();
        let Some(sender) = guard.as_ref() else {
            tracing::debug!("No sender channel, dropping outbound frame");
            return false;
        };

        match sender.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outbound channel full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Outbound channel closed, dropping frame");
                false
            }
        }
    }

    fn fail(&self, error: TransportError) -> TransportError {
        tracing::error!("Session transport error: {}", error);
        self.events.emit(&TransportEvent::Error(error.clone()));
        error
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        if let Some(handle) = self.connection_handle.lock().take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// Outcome of one socket's lifetime.
struct CloseInfo {
    code: Option<u16>,
    reason: String,
}

async fn run_connection(
    ctx: ConnectionContext,
    ws_sink: WsSink,
    ws_source: WsSource,
    mut rx: mpsc::Receiver<Outbound>,
) {
    let mut current_sink = ws_sink;
    let mut current_source = ws_source;
    let reconnection = ctx.config.reconnection.clone();

    'outer: loop {
        let mut heartbeat = ctx.config.ping_interval_secs.filter(|s| *s > 0).map(|secs| {
            let period = Duration::from_secs(secs);
            tokio::time::interval_at(Instant::now() + period, period)
        });

        let close = pump_socket(&ctx, &mut current_sink, &mut current_source, &mut rx, &mut heartbeat).await;

        ctx.connected.store(false, Ordering::SeqCst);
        tracing::info!(
            "Session socket closed (code: {:?}, reason: {})",
            close.code,
            close.reason
        );
        ctx.events.emit(&TransportEvent::Disconnected {
            code: close.code,
            reason: close.reason,
        });

        if ctx.intentional_disconnect.load(Ordering::SeqCst) {
            tracing::info!("Intentional disconnect, not attempting reconnection");
            *ctx.state.write() = ConnectionState::Disconnected;
            break 'outer;
        }

        if !reconnection.enabled {
            tracing::info!("Reconnection disabled");
            *ctx.state.write() = ConnectionState::Disconnected;
            break 'outer;
        }

        loop {
            let attempts = ctx.reconnect_attempts.load(Ordering::SeqCst);
            if !reconnection.should_retry(attempts) {
                tracing::warn!("Reconnection failed after {} attempts, giving up", attempts);
                *ctx.state.write() = ConnectionState::Failed;
                ctx.events.emit(&TransportEvent::ReconnectFailed { attempts });
                break 'outer;
            }

            let attempt = attempts + 1;
            ctx.reconnect_attempts.store(attempt, Ordering::SeqCst);
            *ctx.state.write() = ConnectionState::Reconnecting;

            let delay = Duration::from_millis(reconnection.calculate_delay(attempt));
            tracing::info!(
                "Attempting reconnection {}/{} in {}ms",
                attempt,
                if reconnection.max_attempts == 0 {
                    "∞".to_string()
                } else {
                    reconnection.max_attempts.to_string()
                },
                delay.as_millis()
            );
            ctx.events.emit(&TransportEvent::Reconnecting { attempt, delay });

            tokio::time::sleep(delay).await;

            if ctx.intentional_disconnect.load(Ordering::SeqCst) {
                tracing::info!("Disconnect requested during reconnection delay");
                *ctx.state.write() = ConnectionState::Disconnected;
                break 'outer;
            }

            let Some(token) = ctx.credentials.token() else {
                tracing::warn!("Reconnection attempt {} skipped: no token", attempt);
                continue;
            };

            let url = match ctx.config.session_url(&ctx.conversation_id, &token) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!("Reconnection attempt {} failed: {}", attempt, e);
                    continue;
                }
            };

            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    tracing::info!(
                        "Reconnected conversation {} on attempt {}",
                        ctx.conversation_id,
                        attempt
                    );
                    let (sink, source) = ws_stream.split();
                    current_sink = sink;
                    current_source = source;

                    // Frames queued while the socket was down are stale.
                    while rx.try_recv().is_ok() {}

                    ctx.reconnect_attempts.store(0, Ordering::SeqCst);
                    ctx.connected.store(true, Ordering::SeqCst);
                    *ctx.state.write() = ConnectionState::Connected;
                    ctx.events.emit(&TransportEvent::Connected);
                    continue 'outer;
                }
                Err(e) => {
                    tracing::warn!("Reconnection attempt {} failed: {}", attempt, e);
                }
            }
        }
    }

    *ctx.ws_sender.lock() = None;
    tracing::info!("Session transport task ended");
}

/// Drive one open socket until it closes.
async fn pump_socket(
    ctx: &ConnectionContext,
    sink: &mut WsSink,
    source: &mut WsSource,
    rx: &mut mpsc::Receiver<Outbound>,
    heartbeat: &mut Option<Interval>,
) -> CloseInfo {
    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                let message = match frame {
                    Outbound::Control(control) => match serde_json::to_string(&control) {
                        Ok(json) => Message::Text(json.into()),
                        Err(e) => {
                            tracing::error!("Failed to serialize control message: {}", e);
                            continue;
                        }
                    },
                    Outbound::Audio(data) => Message::Binary(data),
                };

                if let Err(e) = sink.send(message).await {
                    tracing::error!("Failed to send WebSocket frame: {}", e);
                    ctx.events.emit(&TransportEvent::Error(TransportError::WebSocket(e.to_string())));
                    return CloseInfo { code: None, reason: e.to_string() };
                }
            }

            msg = source.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(message) => {
                                tracing::debug!("Received control message: {}", message.kind());
                                ctx.events.emit(&TransportEvent::Message(message));
                            }
                            Err(e) => {
                                let err = TransportError::MessageParseFailed(e.to_string());
                                tracing::warn!("{} - {}", err, text.as_str());
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::trace!("Received audio frame ({} bytes)", data.len());
                        ctx.events.emit(&TransportEvent::AudioData(data));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            tracing::error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
                            None => (None, String::new()),
                        };
                        return CloseInfo { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        ctx.events.emit(&TransportEvent::Error(TransportError::WebSocket(e.to_string())));
                        return CloseInfo { code: None, reason: e.to_string() };
                    }
                    None => {
                        return CloseInfo { code: None, reason: "stream ended".to_string() };
                    }
                }
            }

            _ = tick(heartbeat) => {
                if let Ok(json) = serde_json::to_string(&ClientMessage::Ping) {
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        tracing::error!("Failed to send heartbeat: {}", e);
                        return CloseInfo { code: None, reason: e.to_string() };
                    }
                    tracing::trace!("Heartbeat ping sent");
                }
            }
        }
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
