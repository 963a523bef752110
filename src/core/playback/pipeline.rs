//! Strict FIFO playback of inbound audio frames.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::sink::AudioSink;

/// Invoked with `true` when playback leaves idle and `false` when it returns.
pub type PlaybackStateCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Bytes>,
    playing: bool,
    /// Bumped by `clear()`; a drain task from an older generation exits
    generation: u64,
}

struct Shared {
    sink: Arc<dyn AudioSink>,
    state: Mutex<QueueState>,
    /// Held for the duration of one `sink.play()`
    play_lock: tokio::sync::Mutex<()>,
    callback: RwLock<Option<PlaybackStateCallback>>,
}

impl Shared {
    fn notify(&self, playing: bool) {
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(playing);
        }
    }
}

/// Plays frames one at a time in arrival order.
///
/// A frame never starts before the previous one has finished, including
/// across [`clear`](PlaybackPipeline::clear).
pub struct PlaybackPipeline {
    shared: Arc<Shared>,
}

impl PlaybackPipeline {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                state: Mutex::new(QueueState::default()),
                play_lock: tokio::sync::Mutex::new(()),
                callback: RwLock::new(None),
            }),
        }
    }

    pub fn on_state_change(&self, callback: PlaybackStateCallback) {
        *self.shared.callback.write() = Some(callback);
    }

    /// Queue a frame, starting the drain loop if playback is idle.
    pub fn enqueue(&self, frame: Bytes) {
        let start = {
            let mut state = self.shared.state.lock();
            state.queue.push_back(frame);
            tracing::trace!("Queued audio frame ({} pending)", state.queue.len());
            if state.playing {
                None
            } else {
                state.playing = true;
                Some(state.generation)
            }
        };

        if let Some(generation) = start {
            tracing::debug!("Playback started");
            self.shared.notify(true);
            tokio::spawn(drain(self.shared.clone(), generation));
        }
    }

    /// Drop every queued frame and go idle. A frame already playing finishes.
    pub fn clear(&self) {
        let (dropped, was_playing) = {
            let mut state = self.shared.state.lock();
            let dropped = state.queue.len();
            state.queue.clear();
            state.generation += 1;
            let was_playing = std::mem::replace(&mut state.playing, false);
            (dropped, was_playing)
        };

        if was_playing {
            tracing::debug!("Playback cleared ({} frames dropped)", dropped);
            self.shared.notify(false);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().playing
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.queue.clear();
        state.generation += 1;
        state.playing = false;
    }
}

async fn drain(shared: Arc<Shared>, generation: u64) {
    loop {
        let _turn = shared.play_lock.lock().await;

        let frame = {
            let mut state = shared.state.lock();
            if state.generation != generation {
                return;
            }
            match state.queue.pop_front() {
                Some(frame) => frame,
                None => {
                    state.playing = false;
                    drop(state);
                    tracing::debug!("Playback queue drained");
                    shared.notify(false);
                    return;
                }
            }
        };

        let len = frame.len();
        if let Err(e) = shared.sink.play(frame).await {
            tracing::warn!("Playback of {} byte frame failed: {}", len, e);
        }
    }
}
