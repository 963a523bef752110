//! VAD configuration types

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Configuration for the energy-based voice activity detector.
///
/// Levels are on a 0-100 scale: the RMS of a segment as a percentage of
/// full-scale amplitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VADConfig {
    /// Enable/disable gating. When disabled every segment counts as speech.
    pub enabled: bool,

    /// A segment is loud when its level is strictly above this value (0-100).
    pub volume_threshold: f32,

    /// Consecutive loud segments required to confirm speech.
    pub activation_frames: u32,

    /// Consecutive quiet segments required to confirm the end of speech.
    pub deactivation_frames: u32,

    /// Capacity of the pre-roll buffer held before speech is confirmed.
    /// Oldest segments are discarded first.
    pub max_buffered_segments: usize,
}

impl Default for VADConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            volume_threshold: 3.0,
            // 200ms timeslice: 400ms to confirm, 1s of silence to end
            activation_frames: 2,
            deactivation_frames: 5,
            max_buffered_segments: 5,
        }
    }
}

impl VADConfig {
    /// Create a new VADConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a VADConfig that reacts quickly to speech and pauses
    pub fn low_latency() -> Self {
        Self {
            activation_frames: 1,
            deactivation_frames: 3,
            max_buffered_segments: 3,
            ..Default::default()
        }
    }

    /// Create a VADConfig that ignores short noise bursts and brief pauses
    pub fn high_accuracy() -> Self {
        Self {
            volume_threshold: 5.0,
            activation_frames: 3,
            deactivation_frames: 8,
            max_buffered_segments: 8,
            ..Default::default()
        }
    }

    /// Number of segments spanning `duration_ms` at the given timeslice
    pub fn frames_for_duration(duration_ms: u32, timeslice_ms: u32) -> u32 {
        if timeslice_ms == 0 {
            return 0;
        }
        duration_ms.div_ceil(timeslice_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.volume_threshold) {
            anyhow::bail!("VAD volume_threshold must be between 0 and 100");
        }
        if self.activation_frames == 0 {
            anyhow::bail!("VAD activation_frames must be greater than 0");
        }
        if self.deactivation_frames == 0 {
            anyhow::bail!("VAD deactivation_frames must be greater than 0");
        }
        if self.max_buffered_segments < self.activation_frames as usize {
            anyhow::bail!(
                "VAD max_buffered_segments ({}) must be at least activation_frames ({})",
                self.max_buffered_segments,
                self.activation_frames
            );
        }
        Ok(())
    }
}
