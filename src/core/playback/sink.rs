//! Audio output sinks.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlaybackError {
    /// The frame could not be decoded into playable audio
    #[error("Failed to decode audio frame: {0}")]
    DecodeFailed(String),

    /// The output device or file failed
    #[error("Audio output error: {0}")]
    Io(String),
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;

impl From<std::io::Error> for PlaybackError {
    fn from(err: std::io::Error) -> Self {
        PlaybackError::Io(err.to_string())
    }
}

// =============================================================================
// Sink Trait
// =============================================================================

/// Plays one inbound audio frame.
///
/// `play` resolves when the frame has finished playing; the pipeline never
/// calls it again before that.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, frame: Bytes) -> PlaybackResult<()>;
}

// =============================================================================
// File Sink
// =============================================================================

/// Appends every frame to a file, in play order.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn play(&self, frame: Bytes) -> PlaybackResult<()> {
        if frame.is_empty() {
            return Err(PlaybackError::DecodeFailed("empty audio frame".to_string()));
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&frame).await?;
        file.flush().await?;

        tracing::trace!("Wrote {} bytes to {}", frame.len(), self.path.display());
        Ok(())
    }
}

// =============================================================================
// Null Sink
// =============================================================================

/// Discards audio, optionally taking a fixed time per frame.
#[derive(Debug, Default)]
pub struct NullSink {
    frame_duration: Option<Duration>,
    frames_played: AtomicU64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate `duration` of playback for every frame.
    pub fn with_frame_duration(duration: Duration) -> Self {
        Self {
            frame_duration: Some(duration),
            frames_played: AtomicU64::new(0),
        }
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, _frame: Bytes) -> PlaybackResult<()> {
        if let Some(duration) = self.frame_duration {
            tokio::time::sleep(duration).await;
        }
        self.frames_played.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
