pub mod model;
pub mod replication;
pub mod session;

pub use replication::PhaseTracker;
pub use session::{FocusClient, RoomSession};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::accounting::AccountIdentity;
use crate::config::RoomSettings;
use crate::events::{EventSender, ParticipantInfo, SessionEvent};
use crate::store::SharedStore;
use crate::timer::{TimerAnchor, TimerSnapshot};

use model::Participant;

/// Locally tracked timer state plus the anchor the display derives from.
/// On the host this is the canonical countdown; on everyone else it mirrors
/// the last observed snapshot.
#[derive(Debug)]
pub struct TimerView {
    pub remaining_seconds: u32,
    pub is_break: bool,
    pub is_paused: bool,
    pub current_cycle: u8,
    pub skip_complete_token: u64,
    pub anchor: TimerAnchor,
}

impl TimerView {
    pub fn from_snapshot(snapshot: &TimerSnapshot, observed_at: Instant) -> Self {
        Self {
            remaining_seconds: snapshot.remaining_seconds,
            is_break: snapshot.is_break,
            is_paused: snapshot.is_paused,
            current_cycle: snapshot.current_cycle,
            skip_complete_token: snapshot.skip_complete_token,
            anchor: TimerAnchor::new(snapshot.remaining_seconds, snapshot.is_paused, observed_at),
        }
    }

    pub fn to_snapshot(&self, last_update: i64) -> TimerSnapshot {
        TimerSnapshot {
            remaining_seconds: self.remaining_seconds,
            is_break: self.is_break,
            is_paused: self.is_paused,
            current_cycle: self.current_cycle,
            last_update,
            skip_complete_token: self.skip_complete_token,
        }
    }
}

/// Everything one room membership shares between its tasks.
///
/// Created at join, dropped at leave, never reused across rooms. All the
/// recurring work (host tick, display refresh, accumulator, heartbeat,
/// watch loops) hangs off `cancel` and dies with it.
pub struct RoomContext {
    pub store: Arc<dyn SharedStore>,
    pub room_id: String,
    pub peer_id: String,
    pub nickname: String,
    pub is_host: bool,
    pub joined_at_ms: i64,
    pub settings: Mutex<RoomSettings>,
    pub timer: Mutex<TimerView>,
    pub phase: Mutex<PhaseTracker>,
    pub roster: Mutex<BTreeMap<String, Participant>>,
    pub events: EventSender,
    pub cancel: CancellationToken,
    /// switchPhase in-flight guard; transitions do async accounting before
    /// flipping state and must not interleave.
    pub switching: AtomicBool,
    /// Set once by teardown; everything downstream treats the room as gone.
    pub closed: AtomicBool,
    account: Mutex<Option<AccountIdentity>>,
    task_label: Mutex<Option<String>>,
}

impl RoomContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn SharedStore>,
        room_id: String,
        peer_id: String,
        nickname: String,
        is_host: bool,
        settings: RoomSettings,
        events: EventSender,
    ) -> Self {
        let joined_at_ms = store.now_ms();
        let initial = TimerSnapshot::initial(&settings, joined_at_ms);
        Self {
            store,
            room_id,
            peer_id,
            nickname,
            is_host,
            joined_at_ms,
            settings: Mutex::new(settings),
            timer: Mutex::new(TimerView::from_snapshot(&initial, Instant::now())),
            phase: Mutex::new(PhaseTracker::new()),
            roster: Mutex::new(BTreeMap::new()),
            events,
            cancel: CancellationToken::new(),
            switching: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            account: Mutex::new(None),
            task_label: Mutex::new(None),
        }
    }

    /// The composite gate for all work accounting: room alive, WORK phase,
    /// not paused, account authenticated.
    pub fn work_timing_active(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let authenticated = self.account.lock().unwrap().is_some();
        let timer = self.timer.lock().unwrap();
        authenticated && !timer.is_break && !timer.is_paused
    }

    pub fn account(&self) -> Option<AccountIdentity> {
        self.account.lock().unwrap().clone()
    }

    pub fn set_account(&self, account: Option<AccountIdentity>) {
        *self.account.lock().unwrap() = account;
    }

    pub fn task_label(&self) -> Option<String> {
        self.task_label.lock().unwrap().clone()
    }

    pub fn set_task_label(&self, label: Option<String>) {
        *self.task_label.lock().unwrap() = label;
    }

    pub fn settings(&self) -> RoomSettings {
        *self.settings.lock().unwrap()
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// The full presence record for this client, used for the initial
    /// registration and to repair failed partial writes.
    pub fn participant_value(&self) -> Value {
        let mut value = json!({
            "nickname": self.nickname.clone(),
            "joinedAt": self.joined_at_ms,
            "lastSeen": self.store.now_ms(),
            "peerId": self.peer_id.clone(),
        });
        if let Some(account) = self.account() {
            value["accountUid"] = Value::from(account.uid);
            value["displayName"] = Value::from(account.display_name);
        }
        if let Some(task) = self.task_label() {
            value["task"] = Value::from(task);
        }
        value
    }

    pub fn roster_infos(&self) -> Vec<ParticipantInfo> {
        let now_ms = self.store.now_ms();
        let roster = self.roster.lock().unwrap();
        roster
            .values()
            .map(|participant| ParticipantInfo {
                peer_id: participant.peer_id.clone(),
                nickname: participant.nickname.clone(),
                is_self: participant.peer_id == self.peer_id,
                online: participant.is_online(now_ms),
                task: participant.task.clone(),
            })
            .collect()
    }
}
