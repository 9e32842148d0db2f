use std::sync::{Arc, Mutex};

use chrono::Local;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{self, SharedStore};

/// Pending work crosses a multiple of this many seconds and an opportunistic
/// flush fires.
pub const FLUSH_BOUNDARY_SECONDS: u64 = 30;

/// Authenticated account as handed over by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountIdentity {
    pub uid: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
struct TaskSegment {
    label: Option<String>,
    started_at_ms: i64,
}

#[derive(Debug, Default)]
struct LedgerState {
    pending_work_seconds: u64,
    current_session_seconds: u64,
    timing_active: bool,
    task_label: Option<String>,
    segment: Option<TaskSegment>,
}

/// Durable work accounting for the local participant.
///
/// Seconds are buffered locally and committed in batches. Every flush runs
/// through one chained queue (`flush_chain`): the counters are read and
/// cleared inside the chain before any network write, so an overlapping
/// flush sees zero pending work and is a no-op. Aggregates go through
/// retry-on-conflict increments, never plain overwrites, so concurrent
/// devices on the same account converge.
pub struct WorkLedger {
    store: Arc<dyn SharedStore>,
    room_id: String,
    state: Mutex<LedgerState>,
    flush_chain: tokio::sync::Mutex<()>,
}

impl WorkLedger {
    pub fn new(store: Arc<dyn SharedStore>, room_id: String) -> Self {
        Self {
            store,
            room_id,
            state: Mutex::new(LedgerState::default()),
            flush_chain: tokio::sync::Mutex::new(()),
        }
    }

    /// Adds elapsed active-work seconds to both buffers. Returns true when
    /// the pending buffer crossed a flush boundary.
    pub fn add_work_seconds(&self, seconds: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.timing_active || seconds == 0 {
            return false;
        }
        let before = state.pending_work_seconds;
        state.pending_work_seconds += seconds;
        state.current_session_seconds += seconds;
        before / FLUSH_BOUNDARY_SECONDS != state.pending_work_seconds / FLUSH_BOUNDARY_SECONDS
    }

    pub fn pending_work_seconds(&self) -> u64 {
        self.state.lock().unwrap().pending_work_seconds
    }

    pub fn current_session_seconds(&self) -> u64 {
        self.state.lock().unwrap().current_session_seconds
    }

    pub fn task_label(&self) -> Option<String> {
        self.state.lock().unwrap().task_label.clone()
    }

    /// Credits the unworked remainder of a skipped work phase:
    /// `max(0, configured - currentSession)` lands in both buffers and the
    /// open segment's start shifts back so the logged span covers the whole
    /// configured phase. Returns the credited amount.
    pub fn apply_skip_bonus(&self, configured_work_seconds: u32, authenticated: bool) -> u64 {
        if !authenticated {
            return 0;
        }
        let mut state = self.state.lock().unwrap();
        let bonus =
            (configured_work_seconds as u64).saturating_sub(state.current_session_seconds);
        if bonus == 0 {
            return 0;
        }
        state.pending_work_seconds += bonus;
        state.current_session_seconds += bonus;
        if let Some(segment) = &mut state.segment {
            segment.started_at_ms -= (bonus as i64) * 1000;
        }
        bonus
    }

    /// Tracks the composite work-timing condition. Activation opens a task
    /// segment; deactivation closes and logs it, then force-flushes.
    /// Idempotent for repeated observations of the same state.
    pub async fn set_timing_active(
        &self,
        active: bool,
        account: Option<&AccountIdentity>,
        now_ms: i64,
    ) {
        let closed = {
            let mut state = self.state.lock().unwrap();
            if state.timing_active == active {
                return;
            }
            state.timing_active = active;
            if active {
                state.segment = Some(TaskSegment {
                    label: state.task_label.clone(),
                    started_at_ms: now_ms,
                });
                None
            } else {
                state.segment.take()
            }
        };
        if let Some(segment) = closed {
            self.log_segment(segment, account, now_ms).await;
        }
        if !active {
            self.flush(account).await;
        }
    }

    /// Switches the active task label. While timing is active the old
    /// segment closes and a new one opens at `now_ms`.
    pub async fn set_task_label(
        &self,
        label: Option<String>,
        account: Option<&AccountIdentity>,
        now_ms: i64,
    ) {
        let closed = {
            let mut state = self.state.lock().unwrap();
            if state.task_label == label {
                return;
            }
            state.task_label = label.clone();
            if state.timing_active {
                let previous = state.segment.take();
                state.segment = Some(TaskSegment {
                    label,
                    started_at_ms: now_ms,
                });
                previous
            } else {
                None
            }
        };
        if let Some(segment) = closed {
            self.log_segment(segment, account, now_ms).await;
        }
    }

    /// Drains `pendingWorkSeconds` into the daily/stats/public aggregates.
    ///
    /// A dispatched batch is gone from the buffer even if the writes fail
    /// afterwards; that at-most-once loss is accepted rather than risking a
    /// double count on retry.
    pub async fn flush(&self, account: Option<&AccountIdentity>) {
        let _chain = self.flush_chain.lock().await;
        let Some(account) = account else {
            return;
        };
        let pending = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.pending_work_seconds)
        };
        if pending == 0 {
            return;
        }
        if let Err(err) = self.write_aggregates(account, pending).await {
            warn!("work flush of {pending}s failed: {err}");
        }
    }

    /// Closes the engagement span: final segment and flush, one entry in the
    /// append-only session log, and a `totalSessions` bump.
    pub async fn finalize_session(&self, account: Option<&AccountIdentity>, now_ms: i64) {
        self.set_timing_active(false, account, now_ms).await;
        let Some(account) = account else {
            return;
        };
        let (seconds, task) = {
            let mut state = self.state.lock().unwrap();
            (
                std::mem::take(&mut state.current_session_seconds),
                state.task_label.clone(),
            )
        };
        if seconds == 0 {
            return;
        }
        let entry = json!({
            "date": date_key(),
            "seconds": seconds,
            "roomId": self.room_id.clone(),
            "task": task.unwrap_or_default(),
        });
        let path = format!("users/{}/sessions/{}", account.uid, Uuid::new_v4());
        if let Err(err) = self.store.set(&path, entry).await {
            warn!("session log write failed: {err}");
            return;
        }
        let stats_path = format!("users/{}/stats/totalSessions", account.uid);
        if let Err(err) = store::increment(self.store.as_ref(), &stats_path, 1).await {
            warn!("totalSessions bump failed: {err}");
        }
    }

    async fn write_aggregates(
        &self,
        account: &AccountIdentity,
        seconds: u64,
    ) -> Result<(), StoreError> {
        let delta = seconds.min(i64::MAX as u64) as i64;
        let uid = &account.uid;
        store::increment(
            self.store.as_ref(),
            &format!("users/{uid}/daily/{}/seconds", date_key()),
            delta,
        )
        .await?;
        store::increment(
            self.store.as_ref(),
            &format!("users/{uid}/stats/totalWorkSeconds"),
            delta,
        )
        .await?;
        store::increment(
            self.store.as_ref(),
            &format!("publicUsers/{uid}/totalWorkSeconds"),
            delta,
        )
        .await?;
        self.store
            .update(
                &format!("publicUsers/{uid}"),
                json!({"displayName": account.display_name.clone()}),
            )
            .await
    }

    async fn log_segment(
        &self,
        segment: TaskSegment,
        account: Option<&AccountIdentity>,
        ended_at_ms: i64,
    ) {
        let Some(account) = account else {
            return;
        };
        let duration_ms = ended_at_ms - segment.started_at_ms;
        if duration_ms <= 0 {
            return;
        }
        // round up so a real segment never logs as zero seconds
        let seconds = (duration_ms + 999) / 1000;
        let entry = json!({
            "task": segment.label.unwrap_or_default(),
            "startedAt": segment.started_at_ms,
            "endedAt": ended_at_ms,
            "seconds": seconds,
            "roomId": self.room_id.clone(),
        });
        let path = format!("users/{}/activities/{}", account.uid, Uuid::new_v4());
        if let Err(err) = self.store.set(&path, entry).await {
            warn!("activity segment write failed: {err}");
        }
    }
}

/// Calendar date key for the daily aggregate, in the client's local zone.
pub fn date_key() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}
