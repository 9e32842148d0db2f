pub mod anchor;
pub mod host;
pub mod snapshot;

pub use anchor::TimerAnchor;
pub use snapshot::TimerSnapshot;
