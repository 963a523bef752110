//! Energy-based VAD detector implementation

use std::fmt;
use std::time::Instant;
use tracing::{debug, trace};

use super::config::VADConfig;

/// Result of VAD processing for a single segment
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VADResult {
    /// Whether voice activity is currently confirmed (Active or EndingCandidate)
    pub is_speech: bool,
    /// Level of the processed segment (0-100)
    pub level: f32,
    /// Whether speech was confirmed by this segment
    pub speech_start: bool,
    /// Whether the end of speech was confirmed by this segment
    pub speech_end: bool,
    /// State after processing the segment
    pub state: VADState,
}

/// State machine for VAD transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VADState {
    /// No speech detected
    #[default]
    Silent,
    /// Loud segments seen, waiting for `activation_frames` in a row
    ActiveCandidate,
    /// Confirmed speech in progress
    Active,
    /// Quiet segments seen, waiting for `deactivation_frames` in a row
    EndingCandidate,
}

impl fmt::Display for VADState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VADState::Silent => write!(f, "silent"),
            VADState::ActiveCandidate => write!(f, "active-candidate"),
            VADState::Active => write!(f, "active"),
            VADState::EndingCandidate => write!(f, "ending-candidate"),
        }
    }
}

/// Trait for Voice Activity Detection implementations
pub trait VoiceActivityDetector: Send + Sync {
    /// Process one segment's level and return the VAD result
    fn process_frame(&mut self, level: f32) -> VADResult;

    /// Reset internal state (call when starting a new recording)
    fn reset(&mut self);

    /// Current state
    fn state(&self) -> VADState;

    /// Check if voice activity is confirmed
    fn is_speaking(&self) -> bool;

    /// Get the configuration
    fn config(&self) -> &VADConfig;
}

/// Volume-threshold detector with debounced activation and deactivation.
pub struct EnergyVAD {
    config: VADConfig,
    state: VADState,
    /// Consecutive segments above the threshold
    speech_frames: u32,
    /// Consecutive segments at or below the threshold
    silence_frames: u32,
    /// Statistics: total frames processed
    total_frames: u64,
    /// Statistics: total loud frames
    total_speech_frames: u64,
    /// Statistics: confirmed utterances
    utterances: u64,
    start_time: Instant,
}

impl EnergyVAD {
    pub fn new(config: VADConfig) -> Self {
        debug!(
            "Energy VAD initialized: threshold={:.1}, activation={}f, deactivation={}f",
            config.volume_threshold, config.activation_frames, config.deactivation_frames
        );
        Self {
            config,
            state: VADState::Silent,
            speech_frames: 0,
            silence_frames: 0,
            total_frames: 0,
            total_speech_frames: 0,
            utterances: 0,
            start_time: Instant::now(),
        }
    }

    /// Process a segment level and return the VAD result
    pub fn process_frame(&mut self, level: f32) -> VADResult {
        self.total_frames += 1;

        let is_loud = !self.config.enabled || level > self.config.volume_threshold;

        if is_loud {
            self.speech_frames += 1;
            self.silence_frames = 0;
            self.total_speech_frames += 1;
        } else {
            self.silence_frames += 1;
            self.speech_frames = 0;
        }

        let prev_state = self.state;
        let (new_state, speech_start, speech_end) = self.transition_state(is_loud);
        self.state = new_state;

        if speech_start {
            self.utterances += 1;
        }

        trace!(
            "VAD frame {}: level={:.2}, state={}->{}, speech_start={}, speech_end={}",
            self.total_frames,
            level,
            prev_state,
            self.state,
            speech_start,
            speech_end
        );

        VADResult {
            is_speech: self.is_speaking(),
            level,
            speech_start,
            speech_end,
            state: self.state,
        }
    }

    /// State machine transition logic
    fn transition_state(&self, is_loud: bool) -> (VADState, bool, bool) {
        let activation = if self.config.enabled {
            self.config.activation_frames
        } else {
            1
        };
        let mut speech_start = false;
        let mut speech_end = false;

        let new_state = match self.state {
            VADState::Silent | VADState::ActiveCandidate => {
                if is_loud {
                    if self.speech_frames >= activation {
                        speech_start = true;
                        debug!("Speech confirmed after {} frames", self.speech_frames);
                        VADState::Active
                    } else {
                        VADState::ActiveCandidate
                    }
                } else {
                    VADState::Silent
                }
            }
            VADState::Active | VADState::EndingCandidate => {
                if is_loud {
                    VADState::Active
                } else if self.silence_frames >= self.config.deactivation_frames {
                    speech_end = true;
                    debug!("Speech ended after {} quiet frames", self.silence_frames);
                    VADState::Silent
                } else {
                    VADState::EndingCandidate
                }
            }
        };

        (new_state, speech_start, speech_end)
    }

    /// Reset the VAD state
    pub fn reset(&mut self) {
        self.state = VADState::Silent;
        self.speech_frames = 0;
        self.silence_frames = 0;
        debug!("VAD state reset");
    }

    pub fn state(&self) -> VADState {
        self.state
    }

    /// Check if currently speaking
    pub fn is_speaking(&self) -> bool {
        matches!(self.state, VADState::Active | VADState::EndingCandidate)
    }

    /// Get the configuration
    pub fn config(&self) -> &VADConfig {
        &self.config
    }

    /// Replace the configuration; takes effect on the next segment
    pub fn set_config(&mut self, config: VADConfig) {
        self.config = config;
    }

    /// Get statistics about VAD activity
    pub fn get_stats(&self) -> VADStats {
        let speech_ratio = if self.total_frames > 0 {
            self.total_speech_frames as f32 / self.total_frames as f32
        } else {
            0.0
        };

        VADStats {
            total_frames: self.total_frames,
            total_speech_frames: self.total_speech_frames,
            speech_ratio,
            utterances: self.utterances,
            total_duration_ms: self.start_time.elapsed().as_millis() as u64,
        }
    }
}

impl VoiceActivityDetector for EnergyVAD {
    fn process_frame(&mut self, level: f32) -> VADResult {
        EnergyVAD::process_frame(self, level)
    }

    fn reset(&mut self) {
        EnergyVAD::reset(self)
    }

    fn state(&self) -> VADState {
        EnergyVAD::state(self)
    }

    fn is_speaking(&self) -> bool {
        EnergyVAD::is_speaking(self)
    }

    fn config(&self) -> &VADConfig {
        EnergyVAD::config(self)
    }
}

/// Statistics about VAD activity
#[derive(Debug, Clone)]
pub struct VADStats {
    /// Total frames processed
    pub total_frames: u64,
    /// Total frames above the threshold
    pub total_speech_frames: u64,
    /// Ratio of loud frames to total frames
    pub speech_ratio: f32,
    /// Number of confirmed utterances
    pub utterances: u64,
    /// Time since the detector was created in milliseconds
    pub total_duration_ms: u64,
}

impl fmt::Display for VADStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VAD Stats: {} frames ({} speech, {:.1}% ratio), {} utterances, duration: {}ms",
            self.total_frames,
            self.total_speech_frames,
            self.speech_ratio * 100.0,
            self.utterances,
            self.total_duration_ms
        )
    }
}

/// Level of a PCM 16-bit little-endian buffer on a 0-100 scale.
///
/// Computed as the RMS amplitude relative to full scale. A trailing odd byte
/// is ignored.
pub fn pcm16_level(pcm: &[u8]) -> f32 {
    let samples = pcm.len() / 2;
    if samples == 0 {
        return 0.0;
    }

    let sum_squares: f64 = pcm
        .chunks_exact(2)
        .map(|pair| {
            let sample = i16::from_le_bytes([pair[0], pair[1]]) as f64 / 32768.0;
            sample * sample
        })
        .sum();

    let rms = (sum_squares / samples as f64).sqrt();
    (rms * 100.0).min(100.0) as f32
}
