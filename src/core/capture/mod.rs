//! Microphone capture.
//!
//! A [`CapturePipeline`] acquires a [`CaptureStream`] from an
//! [`AudioCaptureDevice`], runs every segment through the energy VAD and
//! forwards speech to an [`AudioUplink`] (normally the session transport).

pub mod channel;
pub mod device;
pub mod pipeline;
pub mod wav;

pub use channel::ChannelCaptureDevice;
pub use device::{
    AudioCaptureDevice, AudioSegment, AudioUplink, CaptureConstraints, CaptureError,
    CaptureResult, CaptureStream, PermissionState,
};
pub use pipeline::{CaptureConfig, CaptureEndedCallback, CapturePipeline, CapturePolicy};
pub use wav::WavFileCapture;
