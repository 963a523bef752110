//! Capture pipeline: acquisition, VAD gating, pre-roll buffering and paced
//! flushing of captured segments into an [`AudioUplink`].

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::device::{
    AudioCaptureDevice, AudioSegment, AudioUplink, CaptureConstraints, CaptureError,
    CaptureResult, CaptureStream, PermissionState,
};
use crate::core::transport::ControlKind;
use crate::core::vad::{EnergyVAD, VADConfig, VADState, VADStats};

// =============================================================================
// Configuration
// =============================================================================

/// How captured audio is delivered to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    /// Stream segments while the VAD reports speech, with pre-roll
    #[default]
    VadGated,
    /// Send the whole recording as one utterance when recording stops
    FullUtterance,
}

impl FromStr for CapturePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vad" | "vad_gated" | "vad-gated" => Ok(CapturePolicy::VadGated),
            "full" | "full_utterance" | "full-utterance" | "batch" => {
                Ok(CapturePolicy::FullUtterance)
            }
            other => Err(format!("unknown capture policy '{other}'")),
        }
    }
}

impl std::fmt::Display for CapturePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapturePolicy::VadGated => write!(f, "vad_gated"),
            CapturePolicy::FullUtterance => write!(f, "full_utterance"),
        }
    }
}

/// Capture pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub policy: CapturePolicy,
    /// Segment duration requested from the device
    pub timeslice_ms: u32,
    /// Spacing between buffered segments when the pre-roll is flushed
    pub flush_spacing_ms: u64,
    pub vad: VADConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            policy: CapturePolicy::VadGated,
            timeslice_ms: 200,
            flush_spacing_ms: 10,
            vad: VADConfig::default(),
        }
    }
}

impl CaptureConfig {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            timeslice_ms: self.timeslice_ms,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.timeslice_ms == 0 {
            return Err(CaptureError::InvalidConfig(
                "timeslice_ms must be greater than 0".to_string(),
            ));
        }
        self.vad
            .validate()
            .map_err(|e| CaptureError::InvalidConfig(e.to_string()))
    }
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Waiting for the device; `stop_recording` abandons it
    Acquiring,
    Recording,
    /// Capture task is sending its final frames
    Stopping,
}

struct PipelineInner {
    phase: Phase,
    /// Bumped by every start and stop so a stale acquisition can detect it
    generation: u64,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// Called when a recording ends because its stream ran out.
pub type CaptureEndedCallback = Arc<dyn Fn() + Send + Sync>;

/// Microphone capture with voice-activity gating.
///
/// At most one recording runs at a time. `start_recording` while a start is
/// pending or a recording is active fails with [`CaptureError::Busy`].
pub struct CapturePipeline {
    device: Arc<dyn AudioCaptureDevice>,
    config: RwLock<CaptureConfig>,
    vad: Arc<Mutex<EnergyVAD>>,
    inner: Arc<Mutex<PipelineInner>>,
    /// Level of the most recent segment
    level: Arc<Mutex<f32>>,
    on_ended: RwLock<Option<CaptureEndedCallback>>,
}

impl CapturePipeline {
    pub fn new(device: Arc<dyn AudioCaptureDevice>, config: CaptureConfig) -> Self {
        let vad = EnergyVAD::new(config.vad.clone());
        Self {
            device,
            config: RwLock::new(config),
            vad: Arc::new(Mutex::new(vad)),
            inner: Arc::new(Mutex::new(PipelineInner {
                phase: Phase::Idle,
                generation: 0,
                cancel: None,
                task: None,
            })),
            level: Arc::new(Mutex::new(0.0)),
            on_ended: RwLock::new(None),
        }
    }

    /// Register the hook fired when a stream ends without `stop_recording`.
    pub fn on_ended(&self, callback: CaptureEndedCallback) {
        *self.on_ended.write() = Some(callback);
    }

    /// Start capturing and streaming into `uplink`.
    ///
    /// Errors from the device are returned unchanged and are not retried. If
    /// [`stop_recording`](Self::stop_recording) runs while the device is being
    /// acquired, the acquired stream is released immediately, nothing is sent,
    /// and this returns [`CaptureError::Aborted`].
    pub async fn start_recording(&self, uplink: Arc<dyn AudioUplink>) -> CaptureResult<()> {
        let config = self.config.read().clone();

        let generation = {
            let mut inner = self.inner.lock();
            if inner.phase != Phase::Idle {
                tracing::debug!("Capture start rejected: {:?}", inner.phase);
                return Err(CaptureError::Busy);
            }
            inner.phase = Phase::Acquiring;
            inner.generation += 1;
            inner.generation
        };

        {
            let mut vad = self.vad.lock();
            vad.set_config(config.vad.clone());
            vad.reset();
        }

        let constraints = config.constraints();
        tracing::debug!("Acquiring capture device: {:?}", constraints);

        let mut stream = match self.device.acquire(&constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                let mut inner = self.inner.lock();
                if inner.generation == generation && inner.phase == Phase::Acquiring {
                    inner.phase = Phase::Idle;
                }
                tracing::warn!("Capture acquisition failed: {}", e);
                return Err(e);
            }
        };

        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.phase != Phase::Acquiring {
            drop(inner);
            stream.stop();
            tracing::info!("Capture start abandoned; stream released");
            return Err(CaptureError::Aborted);
        }

        if stream.track_count() == 0 {
            inner.phase = Phase::Idle;
            drop(inner);
            stream.stop();
            return Err(CaptureError::NoAudioTrack);
        }
        if !stream.is_active() {
            inner.phase = Phase::Idle;
            drop(inner);
            stream.stop();
            return Err(CaptureError::StreamInactive);
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(capture_loop(
            stream,
            uplink,
            config.clone(),
            CaptureTask {
                generation,
                inner: self.inner.clone(),
                vad: self.vad.clone(),
                level: self.level.clone(),
                cancel: cancel.clone(),
                on_ended: self.on_ended.read().clone(),
            },
        ));

        inner.phase = Phase::Recording;
        inner.cancel = Some(cancel);
        inner.task = Some(task);

        tracing::info!("Recording started ({} policy)", config.policy);
        Ok(())
    }

    /// Stop capturing. Idempotent and safe while a start is pending.
    ///
    /// Returns once the final control frames (if any) have been handed to the
    /// uplink and the device stream has been released.
    pub async fn stop_recording(&self) {
        let (cancel, task) = {
            let mut inner = self.inner.lock();
            match inner.phase {
                Phase::Idle | Phase::Stopping => return,
                Phase::Acquiring => {
                    inner.phase = Phase::Idle;
                    inner.generation += 1;
                    tracing::debug!("Stop requested during acquisition");
                    return;
                }
                Phase::Recording => {
                    inner.phase = Phase::Stopping;
                    inner.generation += 1;
                    (inner.cancel.take(), inner.task.take())
                }
            }
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Capture task ended abnormally: {}", e);
            }
        }

        self.vad.lock().reset();
        *self.level.lock() = 0.0;
        self.inner.lock().phase = Phase::Idle;
        tracing::info!("Recording stopped");
    }

    /// Whether a recording is active.
    pub fn is_recording(&self) -> bool {
        self.inner.lock().phase == Phase::Recording
    }

    /// Whether a start is pending or a recording is active or finishing.
    pub fn is_busy(&self) -> bool {
        self.inner.lock().phase != Phase::Idle
    }

    pub async fn device_permission(&self) -> PermissionState {
        self.device.permission_state().await
    }

    /// Level (0-100) of the last captured segment; 0 when idle.
    pub fn input_level(&self) -> f32 {
        *self.level.lock()
    }

    pub fn vad_state(&self) -> VADState {
        self.vad.lock().state()
    }

    pub fn vad_stats(&self) -> VADStats {
        self.vad.lock().get_stats()
    }

    pub fn config(&self) -> CaptureConfig {
        self.config.read().clone()
    }

    /// Replace the VAD parameters. Applies immediately to an active recording.
    pub fn configure_vad(&self, vad: VADConfig) -> CaptureResult<()> {
        vad.validate()
            .map_err(|e| CaptureError::InvalidConfig(e.to_string()))?;
        self.vad.lock().set_config(vad.clone());
        self.config.write().vad = vad;
        tracing::info!("VAD configuration updated");
        Ok(())
    }

    /// Select the delivery policy for the next recording.
    pub fn set_policy(&self, policy: CapturePolicy) {
        self.config.write().policy = policy;
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Some(cancel) = self.inner.lock().cancel.take() {
            cancel.cancel();
        }
    }
}

// =============================================================================
// Capture Task
// =============================================================================

/// Per-recording gate state.
struct SegmentGate {
    policy: CapturePolicy,
    pre_roll: VecDeque<AudioSegment>,
    pre_roll_capacity: usize,
    utterance: Vec<Bytes>,
    flush_spacing: Duration,
    sent_segments: u64,
}

impl SegmentGate {
    fn new(config: &CaptureConfig) -> Self {
        let capacity = config.vad.max_buffered_segments.max(1);
        Self {
            policy: config.policy,
            pre_roll: VecDeque::with_capacity(capacity),
            pre_roll_capacity: capacity,
            utterance: Vec::new(),
            flush_spacing: Duration::from_millis(config.flush_spacing_ms),
            sent_segments: 0,
        }
    }

    fn buffer(&mut self, segment: AudioSegment) {
        if self.pre_roll.len() >= self.pre_roll_capacity {
            self.pre_roll.pop_front();
        }
        self.pre_roll.push_back(segment);
    }

    async fn process(
        &mut self,
        segment: AudioSegment,
        vad: &Mutex<EnergyVAD>,
        uplink: &dyn AudioUplink,
    ) {
        if self.policy == CapturePolicy::FullUtterance {
            self.utterance.push(segment.data);
            return;
        }

        let result = vad.lock().process_frame(segment.level);

        if result.speech_start {
            uplink.send_control(ControlKind::AudioStart);
            self.buffer(segment);
            self.flush(uplink).await;
        } else if result.is_speech {
            self.send(segment.data, uplink);
        } else {
            if result.speech_end {
                tracing::debug!("Voice activity ended");
                uplink.send_control(ControlKind::AudioEnd);
            }
            self.buffer(segment);
        }
    }

    /// Send the pre-roll in capture order, spaced by `flush_spacing`.
    async fn flush(&mut self, uplink: &dyn AudioUplink) {
        tracing::debug!(
            "Voice activity confirmed, flushing {} buffered segments",
            self.pre_roll.len()
        );
        let mut first = true;
        while let Some(segment) = self.pre_roll.pop_front() {
            if !first && !self.flush_spacing.is_zero() {
                tokio::time::sleep(self.flush_spacing).await;
            }
            first = false;
            self.send(segment.data, uplink);
        }
    }

    fn send(&mut self, data: Bytes, uplink: &dyn AudioUplink) {
        if uplink.send_audio(data) {
            self.sent_segments += 1;
        }
    }

    /// Deliver whatever the policy still owes when recording ends.
    fn finish(&mut self, vad: &Mutex<EnergyVAD>, uplink: &dyn AudioUplink) {
        match self.policy {
            CapturePolicy::VadGated => {
                if vad.lock().is_speaking() {
                    uplink.send_control(ControlKind::AudioEnd);
                }
                if !self.pre_roll.is_empty() {
                    tracing::trace!("Discarding {} unsent pre-roll segments", self.pre_roll.len());
                }
                self.pre_roll.clear();
            }
            CapturePolicy::FullUtterance => {
                if self.utterance.is_empty() {
                    return;
                }
                let total: usize = self.utterance.iter().map(Bytes::len).sum();
                let mut payload = BytesMut::with_capacity(total);
                for chunk in self.utterance.drain(..) {
                    payload.extend_from_slice(&chunk);
                }
                tracing::debug!("Sending full utterance ({} bytes)", total);
                uplink.send_control(ControlKind::AudioStart);
                self.send(payload.freeze(), uplink);
                uplink.send_control(ControlKind::AudioEnd);
            }
        }
    }
}

/// Pipeline state a capture task shares with its [`CapturePipeline`].
struct CaptureTask {
    /// Generation of the recording this task belongs to
    generation: u64,
    inner: Arc<Mutex<PipelineInner>>,
    vad: Arc<Mutex<EnergyVAD>>,
    level: Arc<Mutex<f32>>,
    cancel: CancellationToken,
    on_ended: Option<CaptureEndedCallback>,
}

impl CaptureTask {
    /// Return the pipeline to idle after the stream ran out. A concurrent
    /// `stop_recording` owns the transition instead.
    fn release(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.generation != self.generation || inner.phase != Phase::Recording {
                return;
            }
            inner.phase = Phase::Idle;
            inner.cancel = None;
            inner.task = None;
        }

        self.vad.lock().reset();
        *self.level.lock() = 0.0;
        tracing::info!("Recording ended with its stream");

        if let Some(callback) = &self.on_ended {
            callback();
        }
    }
}

async fn capture_loop(
    mut stream: Box<dyn CaptureStream>,
    uplink: Arc<dyn AudioUplink>,
    config: CaptureConfig,
    task: CaptureTask,
) {
    let mut gate = SegmentGate::new(&config);
    let mut exhausted = false;

    loop {
        tokio::select! {
            biased;

            _ = task.cancel.cancelled() => break,

            segment = stream.next_segment() => match segment {
                Some(segment) => {
                    tracing::trace!("Captured segment ({} bytes, level {:.1})", segment.len(), segment.level);
                    *task.level.lock() = segment.level;
                    gate.process(segment, &task.vad, uplink.as_ref()).await;
                }
                None => {
                    tracing::info!("Capture stream ended");
                    exhausted = true;
                    break;
                }
            }
        }
    }

    gate.finish(&task.vad, uplink.as_ref());
    stream.stop();
    tracing::debug!("Capture task finished ({} segments sent)", gate.sent_segments);

    if exhausted {
        task.release();
    }
}
