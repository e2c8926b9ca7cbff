//! The record scheduler.
//!
//! The scheduler sits in a loop waiting until the next record may be emitted
//! and then emits it. Every emission time comes from the
//! [`RecordDistribution`] and is anchored to the instant the distribution was
//! built, never to the previous emission, so:
//!
//! * there is no skew over time however long the run,
//! * the scheduler knows exactly how far behind it is at any moment, and
//! * falling behind is reported but not corrected. Records that are late are
//!   emitted back to back until the schedule is caught up with.
//!
//! ## Metrics
//!
//! `records_written`: Records handed to the sink
//! `overruns`: Number of times the scheduler woke more than a second late
//! `seconds_behind`: Lateness at the most recent overrun
//!

use std::{num::NonZeroU64, time::Duration};

use metrics::{counter, gauge};
use soakgen_payload::RecordDistribution;
use soakgen_throttle::{Clock, Pacer, RealClock};
use tracing::{debug, error, info};

use crate::sink::{self, Sink};

/// Lateness beyond which the scheduler reports an overrun.
pub const OVERRUN_THRESHOLD: Duration = Duration::from_secs(1);

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Scheduler`].
pub enum Error {
    /// Record generation failed.
    #[error("Record generation error: {0}")]
    Payload(#[from] soakgen_payload::Error),
    /// The sink gave up on a record.
    #[error("Sink error: {0}")]
    Sink(#[from] sink::Error),
}

#[derive(Debug)]
/// Drives a [`RecordDistribution`] into a [`Sink`] on schedule.
pub struct Scheduler<S, C = RealClock> {
    distribution: RecordDistribution,
    sink: S,
    clock: C,
    pacer: Pacer<C>,
    shutdown: soakgen_signal::Watcher,
}

impl<S, C> Scheduler<S, C>
where
    S: Sink,
    C: Clock + Clone,
{
    /// Create a new [`Scheduler`]. `clock` should be the clock `distribution`
    /// was anchored with.
    pub fn new(
        distribution: RecordDistribution,
        sink: S,
        clock: C,
        shutdown: soakgen_signal::Watcher,
    ) -> Self {
        Self {
            distribution,
            sink,
            pacer: Pacer::with_clock(clock.clone()),
            clock,
            shutdown,
        }
    }

    /// The sink records are delivered to.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Emit records until `limit` have been emitted, or forever if `limit` is
    /// `None`. Returns the number of records emitted, which is less than
    /// `limit` only if shutdown was signalled.
    ///
    /// # Errors
    ///
    /// Function will return an error if a record cannot be generated or the
    /// sink fails for good. Lateness is never an error.
    pub async fn run(&mut self, limit: Option<NonZeroU64>) -> Result<u64, Error> {
        let mut emitted = 0;
        for n in 1.. {
            let target = self.distribution.time_for(n);
            if !self.pacer.is_due(target) {
                // About to idle, let the ingestion point see everything so far.
                self.sink.flush().await?;
            }

            let lag = tokio::select! {
                biased;

                () = self.shutdown.recv() => {
                    info!("shutdown signal received");
                    break;
                }
                lag = self.pacer.wait_until(target) => lag,
            };
            if let Some(behind) = lag.filter(|behind| *behind > OVERRUN_THRESHOLD) {
                // Only reported after reading the wall clock and seeing we are
                // more than a second behind.
                error!(
                    "Detected overruns. Log generator {secs:.3} seconds behind schedule.",
                    secs = behind.as_secs_f64()
                );
                counter!("overruns").increment(1);
                gauge!("seconds_behind").set(behind.as_secs_f64());
            }

            let record = self.distribution.record_for(n, || self.clock.now())?;
            match self.sink.deliver(record).await {
                Ok(()) => {}
                Err(err) if err.is_shutdown() => break,
                Err(err) => return Err(err.into()),
            }
            counter!("records_written").increment(1);
            emitted = n;

            if limit.is_some_and(|limit| n >= limit.get()) {
                break;
            }
        }

        self.sink.flush().await?;
        debug!(emitted, "scheduler finished");
        Ok(emitted)
    }
}
