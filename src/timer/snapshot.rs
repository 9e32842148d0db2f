use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::RoomSettings;
use crate::store::coerce;

/// Canonical replicated timer value under `rooms/{id}/timer`.
///
/// Written only by the host. `skip_complete_token` is a monotonic marker:
/// nonzero means the preceding work phase ended with full credit, and every
/// observer applies the bonus at most once per token value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub remaining_seconds: u32,
    pub is_break: bool,
    pub is_paused: bool,
    pub current_cycle: u8,
    pub last_update: i64,
    #[serde(default)]
    pub skip_complete_token: u64,
}

impl TimerSnapshot {
    /// Fresh-room value: a full running work phase.
    pub fn initial(settings: &RoomSettings, now_ms: i64) -> Self {
        Self {
            remaining_seconds: settings.work_seconds(),
            is_break: false,
            is_paused: false,
            current_cycle: 0,
            last_update: now_ms,
            skip_complete_token: 0,
        }
    }

    /// Coerces a raw store value. Only a non-object (or missing) value is
    /// rejected; individual fields fall back rather than fail.
    pub fn from_value(value: Option<&Value>) -> Option<Self> {
        let value = value?;
        if !value.is_object() {
            return None;
        }
        let v = Some(value);
        Some(Self {
            remaining_seconds: coerce::u32_field(v, "remainingSeconds", 0),
            is_break: coerce::bool_field(v, "isBreak", false),
            is_paused: coerce::bool_field(v, "isPaused", false),
            current_cycle: (coerce::u32_field(v, "currentCycle", 0) % 4) as u8,
            last_update: coerce::i64_field(v, "lastUpdate", 0),
            skip_complete_token: coerce::u64_field(v, "skipCompleteToken", 0),
        })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "remainingSeconds": self.remaining_seconds,
            "isBreak": self.is_break,
            "isPaused": self.is_paused,
            "currentCycle": self.current_cycle,
            "lastUpdate": self.last_update,
            "skipCompleteToken": self.skip_complete_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_snapshot_is_a_running_work_phase() {
        let snapshot = TimerSnapshot::initial(&RoomSettings::default(), 1_000);
        assert_eq!(snapshot.remaining_seconds, 1200);
        assert!(!snapshot.is_break);
        assert!(!snapshot.is_paused);
        assert_eq!(snapshot.current_cycle, 0);
        assert_eq!(snapshot.skip_complete_token, 0);
    }

    #[test]
    fn value_roundtrip() {
        let snapshot = TimerSnapshot {
            remaining_seconds: 299,
            is_break: true,
            is_paused: false,
            current_cycle: 3,
            last_update: 1_700_000_000_000,
            skip_complete_token: 42,
        };
        assert_eq!(
            TimerSnapshot::from_value(Some(&snapshot.to_value())),
            Some(snapshot)
        );
    }

    #[test]
    fn hostile_fields_are_coerced_not_fatal() {
        let value = json!({
            "remainingSeconds": "lots",
            "isBreak": 1,
            "currentCycle": 13,
            "lastUpdate": 3.5,
        });
        let snapshot = TimerSnapshot::from_value(Some(&value)).unwrap();
        assert_eq!(snapshot.remaining_seconds, 0);
        assert!(!snapshot.is_break);
        assert_eq!(snapshot.current_cycle, 1); // 13 wraps modulo 4
        assert_eq!(snapshot.last_update, 3);
        assert_eq!(snapshot.skip_complete_token, 0);

        assert_eq!(TimerSnapshot::from_value(Some(&json!("nope"))), None);
        assert_eq!(TimerSnapshot::from_value(None), None);
    }
}
