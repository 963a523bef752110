//! Inbound audio playback.

pub mod pipeline;
pub mod sink;

pub use pipeline::{PlaybackPipeline, PlaybackStateCallback};
pub use sink::{AudioSink, FileSink, NullSink, PlaybackError, PlaybackResult};
