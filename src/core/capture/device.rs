//! Capture device abstraction.
//!
//! The pipeline never talks to an audio API directly; it asks an
//! [`AudioCaptureDevice`] for a [`CaptureStream`] and pulls encoded segments
//! from it.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::core::transport::{ControlKind, SessionTransport};
use crate::core::vad::pcm16_level;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while acquiring or running audio capture.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    /// The user or platform refused microphone access
    #[error("Microphone permission denied: {0}")]
    DeviceDenied(String),

    /// No usable input device
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The platform cannot capture with the requested constraints
    #[error("Capture not supported: {0}")]
    ApiUnsupported(String),

    /// The acquired stream has no audio track
    #[error("Capture stream has no audio track")]
    NoAudioTrack,

    /// The acquired stream is not live
    #[error("Capture stream is not active")]
    StreamInactive,

    /// A start is pending or recording is already active
    #[error("Capture already in progress")]
    Busy,

    /// `stop_recording` was called while the device was being acquired
    #[error("Capture start abandoned by stop")]
    Aborted,

    /// Invalid capture or VAD configuration
    #[error("Invalid capture configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

// =============================================================================
// Segments and Constraints
// =============================================================================

/// One timeslice of captured audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    /// Encoded audio payload, sent to the server unchanged
    pub data: Bytes,
    /// Volume level (0-100) used for voice activity detection
    pub level: f32,
}

impl AudioSegment {
    /// A segment whose level was measured by the device.
    pub fn new(data: impl Into<Bytes>, level: f32) -> Self {
        Self {
            data: data.into(),
            level,
        }
    }

    /// A PCM 16-bit little-endian segment; the level is computed from the samples.
    pub fn from_pcm16(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let level = pcm16_level(&data);
        Self { data, level }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Constraints requested from the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub channel_count: u16,
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    /// Duration of each emitted segment
    pub timeslice_ms: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            channel_count: 1,
            sample_rate: 16000,
            echo_cancellation: true,
            noise_suppression: true,
            timeslice_ms: 200,
        }
    }
}

impl CaptureConstraints {
    /// Samples per segment at the requested rate and timeslice
    pub fn samples_per_segment(&self) -> usize {
        (self.sample_rate as u64 * self.timeslice_ms as u64 / 1000) as usize
    }
}

// =============================================================================
// Device Traits
// =============================================================================

/// Microphone permission as the platform reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not decided yet; `acquire` will ask
    #[default]
    Prompt,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
            PermissionState::Prompt => write!(f, "prompt"),
        }
    }
}

/// Capability to open a microphone-like audio source.
#[async_trait]
pub trait AudioCaptureDevice: Send + Sync {
    /// Acquire a live stream. May wait on user permission.
    async fn acquire(&self, constraints: &CaptureConstraints)
    -> CaptureResult<Box<dyn CaptureStream>>;

    /// Current permission without prompting the user.
    async fn permission_state(&self) -> PermissionState {
        PermissionState::Prompt
    }
}

/// A live capture stream.
#[async_trait]
pub trait CaptureStream: Send {
    /// Number of audio tracks in the stream
    fn track_count(&self) -> usize;

    /// Whether the stream is live
    fn is_active(&self) -> bool;

    /// Next segment, or `None` when the source is exhausted or stopped.
    /// Must be cancel-safe.
    async fn next_segment(&mut self) -> Option<AudioSegment>;

    /// Release the underlying device. Idempotent.
    fn stop(&mut self);
}

// =============================================================================
// Uplink
// =============================================================================

/// Where the capture pipeline sends gated audio.
pub trait AudioUplink: Send + Sync {
    /// Send one binary audio frame; `false` when it was dropped.
    fn send_audio(&self, data: Bytes) -> bool;

    /// Send an utterance control message; `false` when it was dropped.
    fn send_control(&self, kind: ControlKind) -> bool;
}

impl AudioUplink for SessionTransport {
    fn send_audio(&self, data: Bytes) -> bool {
        SessionTransport::send_audio(self, data)
    }

    fn send_control(&self, kind: ControlKind) -> bool {
        SessionTransport::send_control(self, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints() {
        let constraints = CaptureConstraints::default();
        assert_eq!(constraints.channel_count, 1);
        assert_eq!(constraints.sample_rate, 16000);
        assert!(constraints.echo_cancellation);
        assert!(constraints.noise_suppression);
        assert_eq!(constraints.samples_per_segment(), 3200);
    }

    #[test]
    fn test_segment_from_pcm16() {
        let silent = AudioSegment::from_pcm16(vec![0u8; 64]);
        assert_eq!(silent.level, 0.0);
        assert_eq!(silent.len(), 64);

        let loud = AudioSegment::from_pcm16(
            std::iter::repeat(8192i16.to_le_bytes())
                .take(32)
                .flatten()
                .collect::<Vec<u8>>(),
        );
        assert!((loud.level - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_capture_error_display() {
        assert!(
            CaptureError::DeviceDenied("blocked".into())
                .to_string()
                .contains("permission denied")
        );
        assert_eq!(CaptureError::Busy.to_string(), "Capture already in progress");
    }

    #[tokio::test]
    async fn test_permission_state_defaults_to_prompt() {
        struct Unprompted;

        #[async_trait]
        impl AudioCaptureDevice for Unprompted {
            async fn acquire(
                &self,
                _constraints: &CaptureConstraints,
            ) -> CaptureResult<Box<dyn CaptureStream>> {
                Err(CaptureError::ApiUnsupported("test device".into()))
            }
        }

        assert_eq!(Unprompted.permission_state().await, PermissionState::Prompt);
        assert_eq!(PermissionState::default().to_string(), "prompt");
    }
}
