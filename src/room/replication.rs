//! Mapping between the shared store and the local room state.
//!
//! Timer updates arrive as whole-value replacements and may be redelivered
//! (a resubscription after reconnect replays the current value), so every
//! handler here is idempotent: phase transitions are edge-triggered through
//! [`PhaseTracker`] and full-credit completions are deduplicated by their
//! monotonic token.

use std::sync::Arc;

use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::accounting::WorkLedger;
use crate::call::CallController;
use crate::events::{notify, SessionEvent};
use crate::room::model::{participant_path, participants_path, room_path, timer_path, Participant};
use crate::room::RoomContext;
use crate::store::{SharedStore, StoreEvent, WatchKind};
use crate::timer::TimerSnapshot;

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Grace between the room-deleted notification and the forced leave.
pub const ROOM_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// What one observed snapshot means for this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDelta {
    /// `Some(new_is_break)` on a real WORK<->BREAK transition.
    pub edge: Option<bool>,
    /// The snapshot carries an unseen skip-complete token.
    pub apply_bonus: bool,
}

/// Edge detector for replicated timer snapshots.
///
/// The first observation in a session only seeds the baseline: there is no
/// prior state to compare against, so it can never be an edge, and its token
/// is recorded without crediting (a late joiner must not collect a bonus for
/// a skip that happened before it subscribed).
#[derive(Debug, Default)]
pub struct PhaseTracker {
    prev_is_break: Option<bool>,
    last_skip_token: u64,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_skip_token(&self) -> u64 {
        self.last_skip_token
    }

    /// Folds an observed snapshot into the tracker.
    pub fn observe(&mut self, is_break: bool, skip_token: u64) -> PhaseDelta {
        let first = self.prev_is_break.is_none();
        let edge = match self.prev_is_break {
            Some(previous) if previous != is_break => Some(is_break),
            _ => None,
        };
        self.prev_is_break = Some(is_break);

        let apply_bonus = !first && skip_token != 0 && skip_token != self.last_skip_token;
        if skip_token != 0 {
            self.last_skip_token = skip_token;
        }
        PhaseDelta { edge, apply_bonus }
    }

    /// Records a transition this client performed itself, so the snapshot
    /// echoed back by the store is a no-op.
    pub fn mark_local(&mut self, is_break: bool, skip_token: u64) {
        self.prev_is_break = Some(is_break);
        if skip_token != 0 {
            self.last_skip_token = skip_token;
        }
    }
}

/// Applies one observed timer snapshot: anchor update, bonus dedup, and
/// edge-triggered side effects. Shared by the watch loop and tests.
pub(crate) async fn handle_timer_snapshot(
    ctx: &RoomContext,
    ledger: &WorkLedger,
    calls: &CallController,
    snapshot: TimerSnapshot,
) {
    let delta = ctx
        .phase
        .lock()
        .unwrap()
        .observe(snapshot.is_break, snapshot.skip_complete_token);

    if delta.apply_bonus {
        let account = ctx.account();
        let bonus = ledger.apply_skip_bonus(ctx.settings().work_seconds(), account.is_some());
        if bonus > 0 {
            log_info!("full-credit completion: {bonus}s credited");
        }
    }

    {
        let mut timer = ctx.timer.lock().unwrap();
        if !ctx.is_host {
            timer.remaining_seconds = snapshot.remaining_seconds;
            timer.is_paused = snapshot.is_paused;
            timer.current_cycle = snapshot.current_cycle;
            // anchored to the local receipt instant, never the remote clock
            timer
                .anchor
                .reset(snapshot.remaining_seconds, snapshot.is_paused, Instant::now());
        }
        timer.is_break = snapshot.is_break;
        timer.skip_complete_token = snapshot.skip_complete_token;
    }

    match delta.edge {
        Some(is_break) => phase_side_effects(ctx, ledger, calls, is_break).await,
        None => {
            // no edge, but a pause flip still gates accounting
            let account = ctx.account();
            ledger
                .set_timing_active(ctx.work_timing_active(), account.as_ref(), ctx.store.now_ms())
                .await;
        }
    }
}

/// Everything that must happen exactly once per WORK<->BREAK transition.
pub(crate) async fn phase_side_effects(
    ctx: &RoomContext,
    ledger: &WorkLedger,
    calls: &CallController,
    is_break: bool,
) {
    let account = ctx.account();
    ledger
        .set_timing_active(ctx.work_timing_active(), account.as_ref(), ctx.store.now_ms())
        .await;
    ctx.emit(SessionEvent::PhaseChanged { is_break });
    if is_break {
        notify(&ctx.events, "Break time! The room call is starting", false);
        calls.start_break(ctx).await;
        ctx.emit(SessionEvent::CallStarted);
    } else {
        notify(&ctx.events, "Focus time! Back to work", false);
        calls.end_break().await;
        ctx.emit(SessionEvent::CallEnded);
    }
}

/// Follows `rooms/{id}/timer` until the session dies.
pub async fn timer_watch_loop(
    ctx: Arc<RoomContext>,
    ledger: Arc<WorkLedger>,
    calls: Arc<CallController>,
) {
    let mut watch = ctx.store.watch(&timer_path(&ctx.room_id), WatchKind::Value);
    let cancel = ctx.cancel.clone();
    loop {
        tokio::select! {
            event = watch.next() => {
                let Some(StoreEvent::Value(value)) = event else { break };
                let Some(snapshot) = TimerSnapshot::from_value(value.as_ref()) else {
                    continue;
                };
                handle_timer_snapshot(&ctx, &ledger, &calls, snapshot).await;
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Follows the participant roster with child-level granularity.
pub async fn participants_watch_loop(ctx: Arc<RoomContext>, calls: Arc<CallController>) {
    let mut watch = ctx
        .store
        .watch(&participants_path(&ctx.room_id), WatchKind::Children);
    let cancel = ctx.cancel.clone();
    loop {
        tokio::select! {
            event = watch.next() => {
                let Some(event) = event else { break };
                match event {
                    StoreEvent::ChildAdded { key, value }
                    | StoreEvent::ChildChanged { key, value } => {
                        let participant = Participant::from_value(&key, Some(&value));
                        ctx.roster.lock().unwrap().insert(key, participant);
                    }
                    StoreEvent::ChildRemoved { key } => {
                        ctx.roster.lock().unwrap().remove(&key);
                    }
                    StoreEvent::Value(_) => continue,
                }
                ctx.emit(SessionEvent::RosterChanged {
                    participants: ctx.roster_infos(),
                });
                // newcomers during a break get pulled into the call
                calls.sweep(&ctx, false).await;
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Watches the room root; a vanished record forces everyone out.
pub async fn room_watch_loop(ctx: Arc<RoomContext>, teardown: super::session::Teardown) {
    let mut watch = ctx.store.watch(&room_path(&ctx.room_id), WatchKind::Value);
    let cancel = ctx.cancel.clone();
    loop {
        tokio::select! {
            event = watch.next() => {
                match event {
                    Some(StoreEvent::Value(Some(_))) => continue,
                    Some(StoreEvent::Value(None)) => {
                        notify(&ctx.events, "The room was closed", true);
                        ctx.emit(SessionEvent::RoomClosed);
                        tokio::time::sleep(ROOM_CLOSE_GRACE).await;
                        teardown.run(false).await;
                        break;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Refreshes `lastSeen` every few seconds. A failed partial update is
/// repaired by re-issuing the whole presence record; these are idempotent
/// upserts, so nothing surfaces to the user.
pub async fn heartbeat_loop(ctx: Arc<RoomContext>) {
    let path = participant_path(&ctx.room_id, &ctx.peer_id);
    let mut ticker = interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let cancel = ctx.cancel.clone();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let beat = serde_json::json!({ "lastSeen": ctx.store.now_ms() });
                if let Err(err) = ctx.store.update(&path, beat).await {
                    log_warn!("heartbeat failed ({err}), re-issuing presence record");
                    if let Err(err) = ctx.store.set(&path, ctx.participant_value()).await {
                        log_warn!("presence repair failed: {err}");
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Local 1 s display refresh, derived from the anchor alone.
pub async fn display_loop(ctx: Arc<RoomContext>) {
    let mut ticker = interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let cancel = ctx.cancel.clone();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tick = {
                    let timer = ctx.timer.lock().unwrap();
                    SessionEvent::TimerTick {
                        remaining_seconds: timer.anchor.remaining_at(Instant::now()),
                        is_break: timer.is_break,
                        is_paused: timer.is_paused,
                        current_cycle: timer.current_cycle,
                    }
                };
                ctx.emit(tick);
            }
            _ = cancel.cancelled() => break,
        }
    }
}
