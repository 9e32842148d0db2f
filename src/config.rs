use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::store::coerce;

pub const DEFAULT_WORK_MINUTES: u32 = 20;
pub const DEFAULT_BREAK_MINUTES: u32 = 5;

/// Phase durations shared by everyone in a room. Written by the host under
/// `settings/*`, read once by joiners.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub work_minutes: u32,
    pub break_minutes: u32,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            work_minutes: DEFAULT_WORK_MINUTES,
            break_minutes: DEFAULT_BREAK_MINUTES,
        }
    }
}

impl RoomSettings {
    pub fn new(work_minutes: u32, break_minutes: u32) -> Self {
        Self {
            work_minutes,
            break_minutes,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.work_minutes > 0 && self.break_minutes > 0
    }

    pub fn work_seconds(&self) -> u32 {
        self.work_minutes.saturating_mul(60)
    }

    pub fn break_seconds(&self) -> u32 {
        self.break_minutes.saturating_mul(60)
    }

    pub fn phase_seconds(&self, is_break: bool) -> u32 {
        if is_break {
            self.break_seconds()
        } else {
            self.work_seconds()
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "workMinutes": self.work_minutes,
            "breakMinutes": self.break_minutes,
        })
    }

    /// Coerces a `settings/*` node from the store, falling back to the
    /// defaults field by field.
    pub fn from_value(value: Option<&Value>) -> Self {
        let defaults = Self::default();
        Self {
            work_minutes: coerce::u32_field(value, "workMinutes", defaults.work_minutes),
            break_minutes: coerce::u32_field(value, "breakMinutes", defaults.break_minutes),
        }
    }
}
