use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Roster entry as presented to the embedding UI.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub peer_id: String,
    pub nickname: String,
    pub is_self: bool,
    pub online: bool,
    pub task: Option<String>,
}

/// Everything the core reports back to its embedder. Consumed from the
/// receiver handed out by [`RoomSession::take_events`](crate::room::RoomSession::take_events).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionEvent {
    Notification {
        message: String,
        is_error: bool,
    },
    /// Locally derived countdown refresh, emitted about once a second.
    TimerTick {
        remaining_seconds: u32,
        is_break: bool,
        is_paused: bool,
        current_cycle: u8,
    },
    PhaseChanged {
        is_break: bool,
    },
    RosterChanged {
        participants: Vec<ParticipantInfo>,
    },
    CallStarted,
    CallEnded,
    /// The room record disappeared from the store; a forced leave follows.
    RoomClosed,
}

pub type EventSender = UnboundedSender<SessionEvent>;
pub type EventReceiver = UnboundedReceiver<SessionEvent>;

pub(crate) fn notify(events: &EventSender, message: impl Into<String>, is_error: bool) {
    let _ = events.send(SessionEvent::Notification {
        message: message.into(),
        is_error,
    });
}
