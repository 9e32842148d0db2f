use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by a [`SharedStore`](crate::store::SharedStore)
/// implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection unavailable")]
    Unavailable,
    #[error("transaction on {path} gave up after {attempts} attempts")]
    Conflict { path: String, attempts: u32 },
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failures surfaced by an [`AudioTransport`](crate::peer::AudioTransport)
/// implementation.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("microphone capture unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("peer endpoint is not open")]
    NotOpen,
    #[error("audio transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("store did not connect within {0:?}")]
    ConnectTimeout(Duration),
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("nickname must not be empty")]
    EmptyNickname,
    #[error("room id must not be empty")]
    EmptyRoomId,
    #[error("work and break minutes must both be greater than zero")]
    InvalidSettings,
    #[error("only the host can control the shared timer")]
    NotHost,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Call(#[from] CallError),
}
