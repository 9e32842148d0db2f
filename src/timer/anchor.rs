use tokio::time::Instant;

/// Drift-free local countdown derived from the last observed snapshot.
///
/// `observed_at` is always the local receipt instant, never the remote
/// `lastUpdate`: remote timestamps order snapshots, local monotonic time
/// drives the arithmetic, so clock skew between clients never shows up in
/// the display. The derived value depends only on elapsed local time since
/// the last anchor reset, not on how often updates arrive.
#[derive(Debug, Clone, Copy)]
pub struct TimerAnchor {
    remaining_seconds: u32,
    paused: bool,
    observed_at: Instant,
}

impl TimerAnchor {
    pub fn new(remaining_seconds: u32, paused: bool, observed_at: Instant) -> Self {
        Self {
            remaining_seconds,
            paused,
            observed_at,
        }
    }

    /// Re-anchors on a freshly observed snapshot.
    pub fn reset(&mut self, remaining_seconds: u32, paused: bool, observed_at: Instant) {
        self.remaining_seconds = remaining_seconds;
        self.paused = paused;
        self.observed_at = observed_at;
    }

    /// Remaining whole seconds as of `now`. Frozen while paused, clamped at
    /// zero otherwise.
    pub fn remaining_at(&self, now: Instant) -> u32 {
        if self.paused {
            return self.remaining_seconds;
        }
        let elapsed = now.saturating_duration_since(self.observed_at).as_secs();
        self.remaining_seconds
            .saturating_sub(elapsed.min(u32::MAX as u64) as u32)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn counts_down_with_local_time_only() {
        let anchor = TimerAnchor::new(90, false, Instant::now());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(anchor.remaining_at(Instant::now()), 60);
        tokio::time::advance(Duration::from_millis(900)).await;
        assert_eq!(anchor.remaining_at(Instant::now()), 60);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(anchor.remaining_at(Instant::now()), 59);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_anchor_is_frozen() {
        let anchor = TimerAnchor::new(90, true, Instant::now());
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(anchor.remaining_at(Instant::now()), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn clamps_at_zero() {
        let anchor = TimerAnchor::new(5, false, Instant::now());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(anchor.remaining_at(Instant::now()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tolerates_jittered_and_missed_updates() {
        // snapshots arrive late and irregularly; the derived value stays
        // within one second of the ideal countdown
        let mut anchor = TimerAnchor::new(600, false, Instant::now());
        let mut published_remaining = 600u32;
        for (delay_ms, drop_update) in [(1000, false), (3200, true), (5100, false), (900, false)] {
            tokio::time::advance(Duration::from_millis(delay_ms)).await;
            let elapsed = delay_ms / 1000;
            published_remaining = published_remaining.saturating_sub(elapsed as u32);
            if !drop_update {
                anchor.reset(published_remaining, false, Instant::now());
            }
            let ideal = published_remaining as i64;
            let derived = anchor.remaining_at(Instant::now()) as i64;
            assert!(
                (derived - ideal).abs() <= 1,
                "derived {derived} vs ideal {ideal}"
            );
        }
    }
}
