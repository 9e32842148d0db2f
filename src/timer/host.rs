//! The single writer of `rooms/{id}/timer`.
//!
//! Only the current host runs this loop. It ticks at sub-second granularity
//! but decrements by elapsed whole wall-clock seconds since its own last
//! consumed tick, so throttled or late callbacks are absorbed instead of
//! compounding into drift.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{info, warn};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::accounting::WorkLedger;
use crate::call::CallController;
use crate::events::notify;
use crate::room::model::timer_path;
use crate::room::replication::phase_side_effects;
use crate::room::RoomContext;
use crate::store::SharedStore;

pub const HOST_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Publishes the current local timer view as the canonical snapshot.
pub(crate) async fn publish_timer(ctx: &RoomContext) {
    let value = {
        let timer = ctx.timer.lock().unwrap();
        timer.to_snapshot(ctx.store.now_ms()).to_value()
    };
    if let Err(err) = ctx.store.set(&timer_path(&ctx.room_id), value).await {
        warn!("timer publish failed: {err}");
    }
}

/// Authoritative countdown loop.
pub async fn host_timer_loop(
    ctx: Arc<RoomContext>,
    ledger: Arc<WorkLedger>,
    calls: Arc<CallController>,
) {
    let mut ticker = interval(HOST_TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let cancel = ctx.cancel.clone();
    let mut last_tick = Instant::now();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let paused = ctx.timer.lock().unwrap().is_paused;
                if paused {
                    // paused spans must not count as elapsed time on resume
                    last_tick = now;
                    continue;
                }
                let elapsed = now.saturating_duration_since(last_tick).as_secs();
                if elapsed == 0 {
                    continue;
                }
                // consume whole seconds only; the remainder carries over
                last_tick += Duration::from_secs(elapsed);

                let remaining = {
                    let mut timer = ctx.timer.lock().unwrap();
                    let remaining = timer
                        .remaining_seconds
                        .saturating_sub(elapsed.min(u32::MAX as u64) as u32);
                    timer.remaining_seconds = remaining;
                    let paused = timer.is_paused;
                    timer.anchor.reset(remaining, paused, now);
                    remaining
                };

                publish_timer(&ctx).await;

                if remaining == 0 {
                    switch_phase(&ctx, &ledger, &calls, false).await;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Flips WORK<->BREAK, settling accounting first.
///
/// Reentrancy-guarded: the accounting settlement suspends, and a second
/// trigger (tick reaching zero while a manual skip is in flight) must not
/// run a second transition.
pub async fn switch_phase(
    ctx: &RoomContext,
    ledger: &WorkLedger,
    calls: &CallController,
    full_credit: bool,
) {
    if ctx.switching.swap(true, Ordering::SeqCst) {
        return;
    }

    let was_break = ctx.timer.lock().unwrap().is_break;
    let account = ctx.account();
    let mut token = 0u64;

    if !was_break {
        if full_credit {
            let bonus = ledger.apply_skip_bonus(ctx.settings().work_seconds(), account.is_some());
            if bonus > 0 {
                info!("skip credited {bonus}s of the work phase");
            }
            let last = ctx.phase.lock().unwrap().last_skip_token();
            token = (ctx.store.now_ms().max(0) as u64).max(last + 1);
        }
        // settle the finished work phase before the flip is visible anywhere
        ledger
            .set_timing_active(false, account.as_ref(), ctx.store.now_ms())
            .await;
        ledger.flush(account.as_ref()).await;
    }

    let new_is_break = !was_break;
    let phase_seconds = ctx.settings().phase_seconds(new_is_break);
    {
        let mut timer = ctx.timer.lock().unwrap();
        timer.is_break = new_is_break;
        timer.remaining_seconds = phase_seconds;
        if !new_is_break {
            timer.current_cycle = (timer.current_cycle + 1) % 4;
        }
        timer.skip_complete_token = token;
        let paused = timer.is_paused;
        timer.anchor.reset(phase_seconds, paused, Instant::now());
    }
    // record the transition before the store echoes it back
    ctx.phase.lock().unwrap().mark_local(new_is_break, token);

    publish_timer(ctx).await;
    phase_side_effects(ctx, ledger, calls, new_is_break).await;

    ctx.switching.store(false, Ordering::SeqCst);
}

/// Host control: pause or resume the shared timer.
pub async fn set_paused(
    ctx: &RoomContext,
    ledger: &WorkLedger,
    paused: bool,
) {
    {
        let mut timer = ctx.timer.lock().unwrap();
        if timer.is_paused == paused {
            return;
        }
        timer.is_paused = paused;
        let remaining = timer.remaining_seconds;
        timer.anchor.reset(remaining, paused, Instant::now());
    }
    publish_timer(ctx).await;

    let account = ctx.account();
    ledger
        .set_timing_active(ctx.work_timing_active(), account.as_ref(), ctx.store.now_ms())
        .await;
    notify(
        &ctx.events,
        if paused { "Timer paused" } else { "Timer resumed" },
        false,
    );
}
