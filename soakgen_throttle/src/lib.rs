//! The soakgen throttle mechanism
//!
//! This library holds the clock every timed operation in soakgen goes through
//! and the [`Pacer`] that holds a producer to an absolute schedule.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;

mod pacer;

pub use pacer::{Pacer, SLEEP_MARGIN};

#[async_trait]
/// The `Clock` used for every scheduled or delayed operation.
///
/// Time is wall-clock time expressed as the duration since the Unix epoch.
pub trait Clock: Send + Sync {
    /// The current wall-clock time.
    fn now(&self) -> Duration;
    /// Wait for `duration` to pass.
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
/// A clock that operates with respect to real wall-clock time.
pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    /// A system clock set before 1970 reads as the epoch itself.
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// The smallest step a [`ManualClock`] takes on `sleep`, standing in for the
/// timer granularity of a real clock.
pub const MANUAL_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Default)]
/// A virtual clock that only moves when slept on or advanced explicitly.
///
/// Clones share the same time. Every `sleep` advances the clock by the
/// requested duration, or [`MANUAL_TICK`] if that is longer, so callers that
/// poll with zero-length sleeps still make progress.
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a new `ManualClock` reading `start`.
    #[must_use]
    pub fn starting_at(start: Duration) -> Self {
        Self {
            micros: Arc::new(AtomicU64::new(as_micros(start))),
        }
    }

    /// Move the clock forward by `duration` without sleeping.
    pub fn advance(&self, duration: Duration) {
        self.micros.fetch_add(as_micros(duration), Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration.max(MANUAL_TICK));
        tokio::task::yield_now().await;
    }
}

#[allow(clippy::cast_possible_truncation)]
fn as_micros(duration: Duration) -> u64 {
    // 584,554 years of micros fit in a u64.
    duration.as_micros().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::{Clock, MANUAL_TICK, ManualClock, RealClock};

    #[tokio::test]
    async fn manual_clock_moves_only_when_slept() {
        let clock = ManualClock::starting_at(Duration::from_secs(100));
        let other = clock.clone();
        assert_eq!(clock.now(), Duration::from_secs(100));

        clock.sleep(Duration::from_millis(250)).await;
        assert_eq!(other.now(), Duration::from_millis(100_250));

        clock.sleep(Duration::ZERO).await;
        assert_eq!(other.now(), Duration::from_millis(100_250) + MANUAL_TICK);
    }

    #[test]
    fn real_clock_is_after_epoch() {
        // 2020-01-01T00:00:00Z
        assert!(RealClock.now() > Duration::from_secs(1_577_836_800));
    }
}
