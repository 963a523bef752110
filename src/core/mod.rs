pub mod capture;
pub mod chat;
pub mod playback;
pub mod transport;
pub mod vad;

// Re-export commonly used types for convenience
pub use transport::{
    ClientMessage, ConnectionState, ControlKind, EventBus, ReconnectionConfig, ServerMessage,
    SessionTransport, Subscription, TransportConfig, TransportError, TransportEvent,
    TransportEventKind, TransportResult,
};

pub use vad::{EnergyVAD, VADConfig, VADResult, VADState, VADStats, VoiceActivityDetector};

pub use capture::{
    AudioCaptureDevice, AudioSegment, AudioUplink, CaptureConfig, CaptureConstraints,
    CaptureError, CapturePipeline, CapturePolicy, CaptureResult, CaptureStream,
    ChannelCaptureDevice, PermissionState, WavFileCapture,
};

pub use playback::{
    AudioSink, FileSink, NullSink, PlaybackError, PlaybackPipeline, PlaybackResult,
    PlaybackStateCallback,
};

pub use chat::{
    ChatCallbacks, ChatConfig, ChatError, ChatResult, ChatState, ConnectionStatus,
    ConversationOrchestrator,
};
