//! Channel-fed capture device for hosts that own the audio API.
//!
//! The host pushes [`AudioSegment`]s into the sender returned by
//! [`ChannelCaptureDevice::feeder`]; the pipeline pulls them through the
//! regular [`CaptureStream`] interface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::device::{
    AudioCaptureDevice, AudioSegment, CaptureConstraints, CaptureError, CaptureResult,
    CaptureStream, PermissionState,
};

type ReceiverSlot = Arc<Mutex<Option<mpsc::Receiver<AudioSegment>>>>;

pub struct ChannelCaptureDevice {
    sender: mpsc::Sender<AudioSegment>,
    receiver: ReceiverSlot,
    denied: AtomicBool,
}

impl ChannelCaptureDevice {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Arc::new(Mutex::new(Some(receiver))),
            denied: AtomicBool::new(false),
        }
    }

    /// Sender the host uses to push captured segments.
    pub fn feeder(&self) -> mpsc::Sender<AudioSegment> {
        self.sender.clone()
    }

    /// Make subsequent acquisitions fail as if the user refused access.
    pub fn set_permission_denied(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioCaptureDevice for ChannelCaptureDevice {
    async fn acquire(
        &self,
        _constraints: &CaptureConstraints,
    ) -> CaptureResult<Box<dyn CaptureStream>> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceDenied(
                "host refused microphone access".to_string(),
            ));
        }

        let Some(receiver) = self.receiver.lock().take() else {
            return Err(CaptureError::DeviceUnavailable(
                "capture channel already in use".to_string(),
            ));
        };

        Ok(Box::new(ChannelCaptureStream {
            receiver: Some(receiver),
            slot: self.receiver.clone(),
        }))
    }

    async fn permission_state(&self) -> PermissionState {
        if self.denied.load(Ordering::SeqCst) {
            PermissionState::Denied
        } else {
            PermissionState::Granted
        }
    }
}

struct ChannelCaptureStream {
    receiver: Option<mpsc::Receiver<AudioSegment>>,
    /// Receives the channel back on stop so the device can be acquired again
    slot: ReceiverSlot,
}

#[async_trait]
impl CaptureStream for ChannelCaptureStream {
    fn track_count(&self) -> usize {
        1
    }

    fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    async fn next_segment(&mut self) -> Option<AudioSegment> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }

    fn stop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            // Segments pushed while nobody was recording belong to no utterance.
            while receiver.try_recv().is_ok() {}
            *self.slot.lock() = Some(receiver);
        }
    }
}

impl Drop for ChannelCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}
