//! Conversation orchestrator.
//!
//! Ties one [`SessionTransport`], one [`CapturePipeline`] and one
//! [`PlaybackPipeline`] together for a single conversation and translates
//! transport events into host callbacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use super::base::{
    AudioPlayCallback, ChatCallbacks, ChatConfig, ChatError, ChatResult, ChatState,
    ConnectionStatus, ConnectionStatusCallback, LlmStreamCallback, MessageCallback,
    SttResultCallback,
};
use crate::auth::CredentialProvider;
use crate::core::capture::{
    AudioCaptureDevice, AudioUplink, CaptureError, CapturePipeline, PermissionState,
};
use crate::core::playback::{AudioSink, PlaybackPipeline};
use crate::core::transport::{
    ServerMessage, SessionTransport, Subscription, TransportEvent, TransportEventKind,
};

type Confirmation = Arc<Mutex<Option<oneshot::Sender<ChatResult<()>>>>>;

/// State shared with transport event handlers.
struct Dispatch {
    callbacks: RwLock<ChatCallbacks>,
    state: RwLock<ChatState>,
    /// Accumulated `llm_text_stream` text of the reply in progress
    llm_text: Mutex<String>,
    capture: Arc<CapturePipeline>,
    playback: Arc<PlaybackPipeline>,
    /// Pending `initialize()`; `None` once confirmed or failed
    confirmation: Confirmation,
}

impl Dispatch {
    fn report_status(&self, status: ConnectionStatus, detail: &str) {
        let callback = self.callbacks.read().on_connection_status.clone();
        if let Some(callback) = callback {
            callback(status, detail);
        }
    }

    fn confirm(&self, result: ChatResult<()>) -> bool {
        match self.confirmation.lock().take() {
            Some(sender) => {
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    fn is_confirming(&self) -> bool {
        self.confirmation.lock().is_some()
    }

    /// The capture stream ran out while recording.
    fn capture_ended(&self) {
        let mut state = self.state.write();
        if *state == ChatState::Recording {
            *state = ChatState::Connected;
            tracing::info!("Recording ended by its source");
        }
    }

    fn handle_message(&self, message: &ServerMessage) {
        let callbacks = self.callbacks.read().clone();

        match message {
            ServerMessage::SttResult { text, is_final, .. } => {
                tracing::debug!("STT result ({}): {}", if *is_final { "final" } else { "partial" }, text);
                if let Some(callback) = &callbacks.on_stt_result {
                    callback(text, *is_final);
                }
            }
            ServerMessage::LlmTextStream {
                text,
                character_name,
                is_complete,
                ..
            } => {
                let accumulated = {
                    let mut buffer = self.llm_text.lock();
                    buffer.push_str(text);
                    if *is_complete {
                        std::mem::take(&mut *buffer)
                    } else {
                        buffer.clone()
                    }
                };
                tracing::debug!(
                    "LLM stream: {} chars accumulated{}",
                    accumulated.chars().count(),
                    if *is_complete { " (complete)" } else { "" }
                );
                if let Some(callback) = &callbacks.on_llm_stream {
                    callback(&accumulated, *is_complete, character_name.as_deref());
                }
            }
            ServerMessage::TtsAudioMeta {
                audio_size, format, ..
            } => {
                tracing::debug!("TTS audio meta: {:?} bytes, format {:?}", audio_size, format);
            }
            ServerMessage::TtsResult { text, .. } => {
                tracing::debug!("TTS result: {}", text.as_deref().unwrap_or(""));
            }
            ServerMessage::Complete { message, .. } => {
                tracing::debug!("Turn complete: {}", message.as_deref().unwrap_or(""));
            }
            ServerMessage::Error { .. } => {
                let reason = message.error_reason().unwrap_or("server error").to_string();
                tracing::warn!("Server reported error: {}", reason);
                self.report_status(ConnectionStatus::Error, &reason);
            }
            ServerMessage::Status { message, .. } => {
                tracing::info!("Server status: {}", message);
            }
            ServerMessage::Pong { .. } => {
                tracing::trace!("Pong received");
            }
            ServerMessage::Unknown => {
                tracing::debug!("Ignoring unknown message type");
            }
        }

        if let Some(callback) = &callbacks.on_message {
            callback(message);
        }

        if message.confirms_connection() && self.confirm(Ok(())) {
            tracing::info!("Session confirmed by server ({})", message.kind());
        }
    }

    fn handle_event(&self, event: &TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.handle_message(message),
            TransportEvent::AudioData(frame) => {
                tracing::trace!("Inbound audio frame: {} bytes", frame.len());
                self.playback.enqueue(frame.clone());
            }
            TransportEvent::Connected => {
                // The first open is confirmed by the server, not the socket.
                if self.is_confirming() {
                    return;
                }
                let mut state = self.state.write();
                if *state == ChatState::Connecting {
                    // Capture keeps running across a reconnect.
                    *state = if self.capture.is_recording() {
                        ChatState::Recording
                    } else {
                        ChatState::Connected
                    };
                    drop(state);
                    tracing::info!("Session re-established");
                    self.report_status(ConnectionStatus::Connected, "reconnected");
                }
            }
            TransportEvent::Disconnected { code, reason } => {
                if self.confirm(Err(ChatError::TransportOpenFailed(format!(
                    "socket closed before confirmation ({reason})"
                )))) {
                    return;
                }
                let mut state = self.state.write();
                if matches!(*state, ChatState::Connected | ChatState::Recording) {
                    *state = ChatState::Connecting;
                }
                drop(state);
                tracing::info!("Session disconnected (code {:?}): {}", code, reason);
                self.report_status(ConnectionStatus::Disconnected, reason);
            }
            TransportEvent::Error(error) => {
                if self.confirm(Err(ChatError::from(error.clone()))) {
                    return;
                }
                self.report_status(ConnectionStatus::Error, &error.to_string());
            }
            TransportEvent::Reconnecting { attempt, delay } => {
                tracing::info!("Reconnecting (attempt {}) in {:?}", attempt, delay);
            }
            TransportEvent::ReconnectFailed { attempts } => {
                let error = ChatError::ReconnectExhausted {
                    attempts: *attempts,
                };
                tracing::error!("{}", error);
                self.report_status(ConnectionStatus::Error, &error.to_string());
            }
        }
    }
}

/// One realtime voice conversation.
///
/// # Example
///
/// ```rust,ignore
/// let chat = ConversationOrchestrator::new(config, tokens, device, sink);
/// chat.on_llm_stream(|text, done, _| if done { println!("{text}") });
/// chat.initialize("conversation-uuid").await?;
/// chat.send_text_message("hello")?;
/// chat.destroy().await;
/// ```
pub struct ConversationOrchestrator {
    config: ChatConfig,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<SessionTransport>,
    dispatch: Arc<Dispatch>,
    subscriptions: Mutex<Vec<Subscription>>,
    audio_call_active: AtomicBool,
}

impl ConversationOrchestrator {
    pub fn new(
        config: ChatConfig,
        credentials: Arc<dyn CredentialProvider>,
        capture_device: Arc<dyn AudioCaptureDevice>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let transport = Arc::new(SessionTransport::new(
            config.transport.clone(),
            credentials.clone(),
        ));
        let capture = Arc::new(CapturePipeline::new(capture_device, config.capture.clone()));
        let playback = Arc::new(PlaybackPipeline::new(sink));

        let dispatch = Arc::new(Dispatch {
            callbacks: RwLock::new(ChatCallbacks::default()),
            state: RwLock::new(ChatState::Uninitialized),
            llm_text: Mutex::new(String::new()),
            capture: capture.clone(),
            playback: playback.clone(),
            confirmation: Arc::new(Mutex::new(None)),
        });

        let weak = Arc::downgrade(&dispatch);
        capture.on_ended(Arc::new(move || {
            if let Some(dispatch) = weak.upgrade() {
                dispatch.capture_ended();
            }
        }));

        let weak = Arc::downgrade(&dispatch);
        playback.on_state_change(Arc::new(move |playing| {
            let Some(dispatch) = weak.upgrade() else {
                return;
            };
            let callback = dispatch.callbacks.read().on_audio_play.clone();
            if let Some(callback) = callback {
                callback(playing);
            }
        }));

        Self {
            config,
            credentials,
            transport,
            dispatch,
            subscriptions: Mutex::new(Vec::new()),
            audio_call_active: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Callback registration
    // =========================================================================

    pub fn set_callbacks(&self, callbacks: ChatCallbacks) {
        *self.dispatch.callbacks.write() = callbacks;
    }

    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        let callback: MessageCallback = Arc::new(callback);
        self.dispatch.callbacks.write().on_message = Some(callback);
    }

    pub fn on_stt_result<F>(&self, callback: F)
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        let callback: SttResultCallback = Arc::new(callback);
        self.dispatch.callbacks.write().on_stt_result = Some(callback);
    }

    pub fn on_llm_stream<F>(&self, callback: F)
    where
        F: Fn(&str, bool, Option<&str>) + Send + Sync + 'static,
    {
        let callback: LlmStreamCallback = Arc::new(callback);
        self.dispatch.callbacks.write().on_llm_stream = Some(callback);
    }

    pub fn on_audio_play<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let callback: AudioPlayCallback = Arc::new(callback);
        self.dispatch.callbacks.write().on_audio_play = Some(callback);
    }

    pub fn on_connection_status<F>(&self, callback: F)
    where
        F: Fn(ConnectionStatus, &str) + Send + Sync + 'static,
    {
        let callback: ConnectionStatusCallback = Arc::new(callback);
        self.dispatch.callbacks.write().on_connection_status = Some(callback);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the session for `conversation_id` and wait for the server to
    /// confirm it.
    ///
    /// Confirmation is the first `status` message announcing the connection,
    /// or any `stt_result` / `llm_text_stream`. Fails with
    /// [`ChatError::TransportTimeout`] when none arrives within
    /// `connect_timeout_secs`. On failure the orchestrator returns to
    /// [`ChatState::Uninitialized`] and may be initialized again.
    pub async fn initialize(&self, conversation_id: &str) -> ChatResult<()> {
        {
            let mut state = self.dispatch.state.write();
            match *state {
                ChatState::Uninitialized => {}
                ChatState::Closed => return Err(ChatError::Closed),
                other => return Err(ChatError::InvalidState(other)),
            }
            if self.credentials.token().is_none() {
                tracing::warn!("Cannot initialize conversation {}: no token", conversation_id);
                return Err(ChatError::AuthMissing);
            }
            *state = ChatState::Connecting;
        }

        tracing::info!("Initializing conversation {}", conversation_id);

        let (tx, rx) = oneshot::channel();
        *self.dispatch.confirmation.lock() = Some(tx);
        self.subscribe_all();

        if let Err(e) = self.transport.connect(conversation_id).await {
            self.abandon_initialize();
            return Err(e.into());
        }

        let timeout = self.config.connect_timeout();
        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChatError::NotConnected),
            Err(_) => Err(ChatError::TransportTimeout(timeout)),
        };

        if let Err(e) = outcome {
            tracing::error!("Conversation {} failed to initialize: {}", conversation_id, e);
            self.abandon_initialize();
            return Err(e);
        }

        {
            let mut state = self.dispatch.state.write();
            if *state != ChatState::Connecting {
                return Err(ChatError::InvalidState(*state));
            }
            // The socket may already have dropped again; a reconnect moves it on.
            if self.transport.is_connected() {
                *state = ChatState::Connected;
            }
        }

        tracing::info!("Conversation {} ready", conversation_id);
        self.dispatch
            .report_status(ConnectionStatus::Connected, "session established");
        Ok(())
    }

    fn subscribe_all(&self) {
        let kinds = [
            TransportEventKind::Connected,
            TransportEventKind::Message,
            TransportEventKind::AudioData,
            TransportEventKind::Disconnected,
            TransportEventKind::Error,
            TransportEventKind::Reconnecting,
            TransportEventKind::ReconnectFailed,
        ];

        let mut subscriptions = self.subscriptions.lock();
        subscriptions.clear();
        for kind in kinds {
            let dispatch = self.dispatch.clone();
            subscriptions.push(
                self.transport
                    .subscribe(kind, move |event| dispatch.handle_event(event)),
            );
        }
    }

    fn abandon_initialize(&self) {
        self.dispatch.confirmation.lock().take();
        self.subscriptions.lock().clear();
        self.transport.disconnect();
        let mut state = self.dispatch.state.write();
        if *state != ChatState::Closed {
            *state = ChatState::Uninitialized;
        }
    }

    /// Tear everything down. Idempotent and valid in any state.
    pub async fn destroy(&self) {
        let previous = {
            let mut state = self.dispatch.state.write();
            std::mem::replace(&mut *state, ChatState::Closed)
        };
        if previous == ChatState::Closed {
            return;
        }

        tracing::info!("Destroying conversation ({})", previous);

        self.audio_call_active.store(false, Ordering::SeqCst);
        self.dispatch.capture.stop_recording().await;
        self.dispatch.playback.clear();
        self.dispatch.confirmation.lock().take();
        self.subscriptions.lock().clear();
        self.transport.disconnect();
        self.dispatch.llm_text.lock().clear();
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    /// Send a typed user message.
    pub fn send_text_message(&self, text: &str) -> ChatResult<()> {
        self.ensure_open()?;
        if !self.transport.send_text(text) {
            return Err(ChatError::NotConnected);
        }
        tracing::debug!("Sent text message ({} chars)", text.chars().count());
        Ok(())
    }

    /// Start streaming microphone audio.
    pub async fn start_recording(&self) -> ChatResult<()> {
        self.ensure_open()?;
        if !self.transport.is_connected() {
            return Err(ChatError::NotConnected);
        }

        let uplink: Arc<dyn AudioUplink> = self.transport.clone();
        match self.dispatch.capture.start_recording(uplink).await {
            Ok(()) => {
                let mut state = self.dispatch.state.write();
                // A short source may already have ended.
                if *state == ChatState::Connected && self.dispatch.capture.is_recording() {
                    *state = ChatState::Recording;
                }
                Ok(())
            }
            Err(CaptureError::Aborted) => {
                tracing::debug!("Recording start abandoned");
                Ok(())
            }
            Err(e) => Err(ChatError::CaptureFailed(e)),
        }
    }

    /// Stop streaming microphone audio. Idempotent.
    pub async fn stop_recording(&self) -> ChatResult<()> {
        self.dispatch.capture.stop_recording().await;
        let mut state = self.dispatch.state.write();
        if *state == ChatState::Recording {
            *state = ChatState::Connected;
        }
        Ok(())
    }

    /// Begin a hands-free voice call: recording stays on and replies play
    /// as they arrive.
    pub async fn start_audio_call(&self) -> ChatResult<()> {
        self.audio_call_active.store(true, Ordering::SeqCst);
        tracing::info!("Audio call started");
        if let Err(e) = self.start_recording().await {
            self.audio_call_active.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// End the voice call, stop recording and drop queued reply audio.
    pub async fn stop_audio_call(&self) -> ChatResult<()> {
        self.audio_call_active.store(false, Ordering::SeqCst);
        self.stop_recording().await?;
        self.dispatch.playback.clear();
        tracing::info!("Audio call stopped");
        Ok(())
    }

    fn ensure_open(&self) -> ChatResult<()> {
        match *self.dispatch.state.read() {
            ChatState::Connected | ChatState::Recording => Ok(()),
            ChatState::Closed => Err(ChatError::Closed),
            ChatState::Connecting => Err(ChatError::NotConnected),
            other => Err(ChatError::InvalidState(other)),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> ChatState {
        *self.dispatch.state.read()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ChatState::Connected | ChatState::Recording)
            && self.transport.is_connected()
    }

    pub fn is_recording(&self) -> bool {
        self.dispatch.capture.is_recording()
    }

    /// Microphone permission as the capture device reports it, without prompting.
    pub async fn microphone_permission(&self) -> PermissionState {
        self.dispatch.capture.device_permission().await
    }

    /// Level (0-100) of the most recent captured segment, for a level meter.
    pub fn input_level(&self) -> f32 {
        self.dispatch.capture.input_level()
    }

    pub fn is_playing(&self) -> bool {
        self.dispatch.playback.is_playing()
    }

    pub fn audio_call_active(&self) -> bool {
        self.audio_call_active.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    pub fn capture(&self) -> &CapturePipeline {
        &self.dispatch.capture
    }

    pub fn playback(&self) -> &PlaybackPipeline {
        &self.dispatch.playback
    }
}

impl Drop for ConversationOrchestrator {
    fn drop(&mut self) {
        self.subscriptions.get_mut().clear();
        self.transport.disconnect();
    }
}
