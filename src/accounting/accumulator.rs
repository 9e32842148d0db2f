//! Local 1 s work accumulator.
//!
//! Like the host ticker, the loop never assumes it runs on time: each tick
//! measures elapsed whole seconds since the last consumed tick and carries
//! the remainder, so throttling costs nothing. It also owns the
//! activation edge: when the composite work-timing gate flips, segments
//! open/close and a forced flush runs through the ledger.

use std::sync::Arc;

use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use super::WorkLedger;
use crate::room::RoomContext;
use crate::store::SharedStore;

pub const ACCUMULATOR_INTERVAL: Duration = Duration::from_secs(1);

pub async fn accumulator_loop(ctx: Arc<RoomContext>, ledger: Arc<WorkLedger>) {
    let mut ticker = interval(ACCUMULATOR_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let cancel = ctx.cancel.clone();
    let mut last_tick = Instant::now();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(last_tick).as_secs();
                if elapsed == 0 {
                    continue;
                }
                last_tick += Duration::from_secs(elapsed);

                let active = ctx.work_timing_active();
                let account = ctx.account();
                ledger
                    .set_timing_active(active, account.as_ref(), ctx.store.now_ms())
                    .await;
                if !active {
                    continue;
                }
                if ledger.add_work_seconds(elapsed) {
                    // pending crossed a 30 s boundary
                    ledger.flush(account.as_ref()).await;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}
