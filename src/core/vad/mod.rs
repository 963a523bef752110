//! Voice Activity Detection (VAD) module
//!
//! Classifies captured segments as speech or silence from their volume level
//! so the capture pipeline only streams audio while the user is talking.
//! Activation and deactivation are both debounced by consecutive-segment
//! counts, which keeps short noise spikes and short pauses from toggling the
//! state.
//!
//! # Example
//!
//! ```rust
//! use vocata_realtime::core::vad::{EnergyVAD, VADConfig, VADState};
//!
//! let mut vad = EnergyVAD::new(VADConfig {
//!     volume_threshold: 30.0,
//!     activation_frames: 2,
//!     ..Default::default()
//! });
//!
//! assert_eq!(vad.process_frame(45.0).state, VADState::ActiveCandidate);
//! assert!(vad.process_frame(50.0).speech_start);
//! ```

pub mod config;
pub mod detector;

pub use config::VADConfig;
pub use detector::{
    EnergyVAD, VADResult, VADState, VADStats, VoiceActivityDetector, pcm16_level,
};
