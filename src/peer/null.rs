//! No-op transport for audio-less embeddings and tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use super::{AudioTransport, CallEvent, CallEvents};
use crate::error::CallError;

/// Accepts every operation and never produces events. Event streams stay
/// open until [`AudioTransport::shutdown`].
#[derive(Default)]
pub struct NullAudioTransport {
    event_senders: Mutex<Vec<UnboundedSender<CallEvent>>>,
}

impl NullAudioTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioTransport for NullAudioTransport {
    async fn open(&self, _local_id: &str) -> Result<(), CallError> {
        Ok(())
    }

    async fn capture_microphone(&self) -> Result<(), CallError> {
        Ok(())
    }

    fn release_microphone(&self) {}

    async fn dial(&self, _remote_id: &str) -> Result<(), CallError> {
        Ok(())
    }

    async fn answer(&self, _remote_id: &str) -> Result<(), CallError> {
        Ok(())
    }

    fn hang_up(&self, _remote_id: &str) {}

    fn set_muted(&self, _muted: bool) {}

    fn events(&self) -> CallEvents {
        let (tx, events) = CallEvents::channel();
        self.event_senders.lock().unwrap().push(tx);
        events
    }

    async fn shutdown(&self) {
        self.event_senders.lock().unwrap().clear();
    }
}
