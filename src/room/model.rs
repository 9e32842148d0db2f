use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::coerce;

/// A participant is rendered online while its heartbeat is younger than
/// this.
pub const ONLINE_THRESHOLD_MS: i64 = 15_000;

pub fn room_path(room_id: &str) -> String {
    format!("rooms/{room_id}")
}

pub fn timer_path(room_id: &str) -> String {
    format!("rooms/{room_id}/timer")
}

pub fn settings_path(room_id: &str) -> String {
    format!("rooms/{room_id}/settings")
}

pub fn participants_path(room_id: &str) -> String {
    format!("rooms/{room_id}/participants")
}

pub fn participant_path(room_id: &str, peer_id: &str) -> String {
    format!("rooms/{room_id}/participants/{peer_id}")
}

/// One connected client, keyed under `participants/{peerId}` by the same
/// per-session identity used for audio-call addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub nickname: String,
    pub joined_at: i64,
    pub last_seen: i64,
    pub peer_id: String,
    pub account_uid: Option<String>,
    pub display_name: Option<String>,
    pub task: Option<String>,
}

impl Participant {
    /// Coerces a raw child value; the key doubles as the peer id when the
    /// record itself lacks one.
    pub fn from_value(key: &str, value: Option<&Value>) -> Self {
        Self {
            nickname: coerce::str_field(value, "nickname", "?"),
            joined_at: coerce::i64_field(value, "joinedAt", 0),
            last_seen: coerce::i64_field(value, "lastSeen", 0),
            peer_id: {
                let peer_id = coerce::str_field(value, "peerId", key);
                if peer_id.is_empty() {
                    key.to_string()
                } else {
                    peer_id
                }
            },
            account_uid: coerce::opt_str_field(value, "accountUid"),
            display_name: coerce::opt_str_field(value, "displayName"),
            task: coerce::opt_str_field(value, "task"),
        }
    }

    /// Liveness is derived from the heartbeat, never stored.
    pub fn is_online(&self, now_ms: i64) -> bool {
        now_ms - self.last_seen < ONLINE_THRESHOLD_MS
    }
}
