//! Scripted session backend for integration tests.
//!
//! Each accepted connection replays the same script: an optional status
//! greeting, a list of frames, then either a close or a read loop that
//! records everything the client sends.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Greeting the real backend sends once the session is open.
pub const ESTABLISHED: &str = "WebSocket连接已建立";

/// A frame received from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Control(Value),
    Audio(Vec<u8>),
}

impl Received {
    /// The `type` of a control frame.
    pub fn control_type(&self) -> Option<&str> {
        match self {
            Received::Control(value) => value["type"].as_str(),
            Received::Audio(_) => None,
        }
    }
}

/// Per-connection behaviour of the mock backend.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Status text sent right after the handshake
    pub greeting: Option<String>,
    /// Frames sent after the greeting
    pub frames: Vec<Message>,
    /// Close the socket once the frames are sent
    pub close_after_frames: bool,
    /// Wait this long before closing
    pub close_delay: Option<Duration>,
    /// Only the first this many connections close; later ones listen
    pub close_limit: Option<usize>,
    /// Reply to each `text_message` with these assistant chunks; the last one completes the turn
    pub reply_chunks: Vec<String>,
    /// Stop accepting (and refuse further connections) after this many
    pub max_connections: Option<usize>,
}

impl Script {
    /// Greets like the real backend, then listens.
    pub fn established() -> Self {
        Self {
            greeting: Some(ESTABLISHED.to_string()),
            ..Default::default()
        }
    }

    /// Accepts the socket and never says anything.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_frames(mut self, frames: Vec<Message>) -> Self {
        self.frames = frames;
        self
    }

    pub fn closing(mut self) -> Self {
        self.close_after_frames = true;
        self
    }

    pub fn closing_after(mut self, delay: Duration) -> Self {
        self.close_after_frames = true;
        self.close_delay = Some(delay);
        self
    }

    /// Close only the first connection, so a reconnect lands on a live socket.
    pub fn closing_first_after(mut self, delay: Duration) -> Self {
        self.close_limit = Some(1);
        self.closing_after(delay)
    }

    pub fn replying(mut self, chunks: &[&str]) -> Self {
        self.reply_chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }
}

/// JSON control frame as the backend sends it.
pub fn text_frame(value: Value) -> Message {
    Message::Text(value.to_string().into())
}

pub fn binary_frame(data: Vec<u8>) -> Message {
    Message::Binary(data.into())
}

/// Running mock backend. Aborted on drop.
pub struct MockSessionServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    request_uris: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockSessionServer {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock session server");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let received = Arc::new(Mutex::new(Vec::new()));
        let request_uris = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let handle = {
            let received = received.clone();
            let request_uris = request_uris.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    let accepted = connections.fetch_add(1, Ordering::SeqCst) + 1;

                    tokio::spawn(handle_connection(
                        stream,
                        accepted,
                        script.clone(),
                        received.clone(),
                        request_uris.clone(),
                    ));

                    if script.max_connections == Some(accepted) {
                        // Dropping the listener makes further connects fail.
                        break;
                    }
                }
            })
        };

        Self {
            addr,
            received,
            request_uris,
            connections,
            handle,
        }
    }

    /// Base URL to put in `TransportConfig::ws_url`.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }

    pub fn request_uris(&self) -> Vec<String> {
        self.request_uris.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until `predicate` holds for the received frames.
    pub async fn wait_for<F>(&self, predicate: F) -> Vec<Received>
    where
        F: Fn(&[Received]) -> bool,
    {
        for _ in 0..200 {
            {
                let received = self.received.lock();
                if predicate(received.as_slice()) {
                    return received.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mock server never saw the expected frames: {:?}", self.received());
    }
}

impl Drop for MockSessionServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    index: usize,
    script: Script,
    received: Arc<Mutex<Vec<Received>>>,
    request_uris: Arc<Mutex<Vec<String>>>,
) {
    let uris = request_uris.clone();
    let record_uri = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        uris.lock().push(request.uri().to_string());
        Ok(response)
    };
    let ws_stream = match accept_hdr_async(stream, record_uri).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("Mock session handshake failed: {e}");
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    if let Some(greeting) = script.greeting.as_ref() {
        let status = json!({ "type": "status", "message": greeting });
        if write.send(text_frame(status)).await.is_err() {
            return;
        }
    }

    for frame in &script.frames {
        if write.send(frame.clone()).await.is_err() {
            return;
        }
    }

    let closes = script.close_after_frames && script.close_limit.is_none_or(|limit| index <= limit);
    if closes {
        if let Some(delay) = script.close_delay {
            tokio::time::sleep(delay).await;
        }
        let _ = write.send(Message::Close(None)).await;
        return;
    }

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                let is_text_message = value["type"] == "text_message";
                received.lock().push(Received::Control(value));

                if is_text_message {
                    let last = script.reply_chunks.len().saturating_sub(1);
                    for (i, chunk) in script.reply_chunks.iter().enumerate() {
                        let reply = json!({
                            "type": "llm_text_stream",
                            "text": chunk,
                            "isComplete": i == last,
                            "characterName": "Mock"
                        });
                        if write.send(text_frame(reply)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Ok(Message::Binary(data)) => {
                received.lock().push(Received::Audio(data.to_vec()));
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
}
