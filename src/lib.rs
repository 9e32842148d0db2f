//! Shared focus rooms.
//!
//! A small group synchronizes on one pomodoro-style timer: a single host
//! drives the canonical countdown and replicates it through a shared
//! key-value store, everyone else derives a smooth local countdown from the
//! last observed snapshot, and peer-to-peer audio calls open automatically
//! during breaks. Work time is accounted per authenticated user into daily
//! totals, lifetime stats and per-task activity segments.
//!
//! The store and the audio transport are consumed capabilities behind the
//! [`store::SharedStore`] and [`peer::AudioTransport`] traits; the crate
//! ships an in-memory store and a no-op transport for embedding and tests.

pub mod accounting;
pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod peer;
pub mod reconnect;
pub mod room;
pub mod store;
pub mod timer;
mod utils;

pub use accounting::AccountIdentity;
pub use config::RoomSettings;
pub use error::{CallError, SessionError, StoreError};
pub use events::{EventReceiver, ParticipantInfo, SessionEvent};
pub use room::session::TimerReadout;
pub use room::{FocusClient, RoomSession};
pub use timer::TimerSnapshot;

/// Initializes logging for binaries embedding the crate (reads `RUST_LOG`).
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
