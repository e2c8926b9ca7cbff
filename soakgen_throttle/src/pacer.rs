//! Absolute-schedule pacing
//!
//! A [`Pacer`] holds its caller to targets expressed as absolute wall-clock
//! times. Falling behind is measured and handed back to the caller; it is never
//! compensated for here, the next target is simply already in the past.

use std::time::Duration;

use crate::{Clock, RealClock};

/// How far ahead of a target the pacer stops sleeping and starts polling.
/// Absorbs timer granularity so the pacer does not oversleep the target.
pub const SLEEP_MARGIN: Duration = Duration::from_millis(50);

#[derive(Debug)]
/// Waits for absolute wall-clock targets.
pub struct Pacer<C = RealClock> {
    clock: C,
    /// The last time the clock was observed to have passed. Any target at or
    /// before this point is already due without consulting the clock.
    last_checked: Duration,
}

impl<C> Pacer<C>
where
    C: Clock,
{
    /// Create a new `Pacer` reading time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            last_checked: Duration::ZERO,
        }
    }

    /// Whether `target` is known to be due without reading the clock.
    #[must_use]
    pub fn is_due(&self, target: Duration) -> bool {
        target <= self.last_checked
    }

    /// Wait until the clock reads at or after `target`.
    ///
    /// Returns `None` when `target` was already known to be due and the clock
    /// was not consulted. Otherwise returns how far past `target` the clock
    /// read on waking, zero or more.
    pub async fn wait_until(&mut self, target: Duration) -> Option<Duration> {
        if self.is_due(target) {
            return None;
        }

        loop {
            let now = self.clock.now();
            if now >= target {
                break;
            }
            let slop = (target - now).saturating_sub(SLEEP_MARGIN);
            self.clock.sleep(slop).await;
        }

        let now = self.clock.now();
        self.last_checked = now;
        Some(now.saturating_sub(target))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use proptest::prelude::*;

    use crate::{Clock, MANUAL_TICK, ManualClock, Pacer, SLEEP_MARGIN};

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(future)
    }

    #[tokio::test]
    async fn waits_until_target() {
        let start = Duration::from_secs(1_000);
        let clock = ManualClock::starting_at(start);
        let mut pacer = Pacer::with_clock(clock.clone());

        let target = start + Duration::from_secs(3);
        let lag = pacer.wait_until(target).await.expect("clock consulted");
        assert!(clock.now() >= target);
        assert!(lag <= MANUAL_TICK, "overslept by {lag:?}");
    }

    #[tokio::test]
    async fn known_due_target_skips_the_clock() {
        let start = Duration::from_secs(1_000);
        let clock = ManualClock::starting_at(start);
        let mut pacer = Pacer::with_clock(clock.clone());

        assert!(pacer.wait_until(start).await.is_some());
        assert!(pacer.is_due(start));
        // Moving the clock does not matter, the pacer does not look.
        clock.advance(Duration::from_secs(10));
        assert_eq!(pacer.wait_until(start).await, None);
    }

    #[tokio::test]
    async fn lag_is_reported_not_corrected() {
        let start = Duration::from_secs(1_000);
        let clock = ManualClock::starting_at(start);
        let mut pacer = Pacer::with_clock(clock.clone());

        clock.advance(Duration::from_secs(5));
        let lag = pacer
            .wait_until(start + Duration::from_secs(2))
            .await
            .expect("clock consulted");
        assert_eq!(lag, Duration::from_secs(3));
        assert_eq!(clock.now(), start + Duration::from_secs(5));
    }

    // However far away the target, the pacer wakes at or after it and no more
    // than a tick later.
    proptest! {
        #[test]
        fn never_wakes_early(offset_millis in 0u64..10_000) {
            let start = Duration::from_secs(1_000);
            let clock = ManualClock::starting_at(start);
            let mut pacer = Pacer::with_clock(clock.clone());
            let target = start + Duration::from_millis(offset_millis);

            block_on(pacer.wait_until(target));
            prop_assert!(clock.now() >= target);
            prop_assert!(clock.now() - target <= MANUAL_TICK.max(SLEEP_MARGIN));
        }
    }
}
