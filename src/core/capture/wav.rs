//! WAV file capture source.
//!
//! Plays a 16-bit PCM WAV file as if it were a microphone: the file is split
//! into timeslice-sized segments that are released at real-time pace.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{Instant, Interval};

use super::device::{
    AudioCaptureDevice, AudioSegment, CaptureConstraints, CaptureError, CaptureResult,
    CaptureStream, PermissionState,
};

/// Capture device backed by a WAV file.
#[derive(Debug, Clone)]
pub struct WavFileCapture {
    path: PathBuf,
    realtime: bool,
}

impl WavFileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: true,
        }
    }

    /// Release segments as fast as they are pulled instead of at real-time pace.
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AudioCaptureDevice for WavFileCapture {
    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> CaptureResult<Box<dyn CaptureStream>> {
        let path = self.path.clone();
        let constraints = *constraints;

        let segments = tokio::task::spawn_blocking(move || read_segments(&path, &constraints))
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(format!("WAV reader task failed: {e}")))??;

        tracing::info!(
            "WAV capture opened: {} ({} segments)",
            self.path.display(),
            segments.len()
        );

        let pacing = if self.realtime {
            let period = Duration::from_millis(constraints.timeslice_ms.max(1) as u64);
            Some(tokio::time::interval_at(Instant::now() + period, period))
        } else {
            None
        };

        Ok(Box::new(WavCaptureStream {
            segments,
            pacing,
            active: true,
        }))
    }

    /// A file needs no user consent.
    async fn permission_state(&self) -> PermissionState {
        PermissionState::Granted
    }
}

/// Decode the file, downmix to mono, and cut it into PCM16 segments.
fn read_segments(path: &Path, constraints: &CaptureConstraints) -> CaptureResult<VecDeque<Bytes>> {
    let mut reader = hound::WavReader::open(path).map_err(|e| {
        CaptureError::DeviceUnavailable(format!("cannot open {}: {e}", path.display()))
    })?;

    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(CaptureError::ApiUnsupported(format!(
            "only 16-bit integer PCM is supported, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    if spec.channels == 0 {
        return Err(CaptureError::NoAudioTrack);
    }
    if spec.sample_rate != constraints.sample_rate {
        tracing::warn!(
            "WAV sample rate {}Hz differs from requested {}Hz; sending unchanged",
            spec.sample_rate,
            constraints.sample_rate
        );
    }

    let channels = spec.channels as usize;
    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("corrupt WAV data: {e}")))?;

    let mono: Vec<i16> = samples
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|s| *s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect();

    let per_segment = (spec.sample_rate as u64 * constraints.timeslice_ms as u64 / 1000).max(1) as usize;

    Ok(mono
        .chunks(per_segment)
        .map(|chunk| {
            let bytes: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
            Bytes::from(bytes)
        })
        .collect())
}

struct WavCaptureStream {
    segments: VecDeque<Bytes>,
    pacing: Option<Interval>,
    active: bool,
}

#[async_trait]
impl CaptureStream for WavCaptureStream {
    fn track_count(&self) -> usize {
        1
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn next_segment(&mut self) -> Option<AudioSegment> {
        if !self.active || self.segments.is_empty() {
            return None;
        }
        if let Some(pacing) = self.pacing.as_mut() {
            pacing.tick().await;
        }
        self.segments.pop_front().map(AudioSegment::from_pcm16)
    }

    fn stop(&mut self) {
        if self.active {
            tracing::debug!("WAV capture stopped with {} segments unread", self.segments.len());
        }
        self.active = false;
        self.segments.clear();
    }
}
