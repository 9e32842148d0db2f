//! Addressable peer-to-peer audio, as consumed by the call lifecycle.
//!
//! Peers are addressed by the same identity used for the participant
//! record. The transport owns media capture and signaling; the core only
//! decides when to dial, answer and hang up.

pub mod null;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::CallError;

#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// A remote peer is calling us.
    Incoming { from: String },
    /// The remote audio stream for an established call attached.
    RemoteStream { from: String },
    Closed { peer: String },
    Failed { peer: String, reason: String },
}

pub struct CallEvents {
    rx: UnboundedReceiver<CallEvent>,
}

impl CallEvents {
    pub fn channel() -> (UnboundedSender<CallEvent>, CallEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, CallEvents { rx })
    }

    pub async fn next(&mut self) -> Option<CallEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait AudioTransport: Send + Sync {
    /// Registers the local peer identity with the transport.
    async fn open(&self, local_id: &str) -> Result<(), CallError>;

    /// Acquires the local microphone stream. Fails when capture permission
    /// is denied or no device is available.
    async fn capture_microphone(&self) -> Result<(), CallError>;

    fn release_microphone(&self);

    /// Places an outbound call carrying the captured local stream.
    async fn dial(&self, remote_id: &str) -> Result<(), CallError>;

    /// Answers an inbound call with the captured local stream.
    async fn answer(&self, remote_id: &str) -> Result<(), CallError>;

    fn hang_up(&self, remote_id: &str);

    /// Enables or disables the local audio tracks without tearing calls
    /// down.
    fn set_muted(&self, muted: bool);

    fn events(&self) -> CallEvents;

    /// Destroys the whole endpoint; every call drops.
    async fn shutdown(&self);
}
