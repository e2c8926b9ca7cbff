//! Fixed-size, fixed-rate record distribution.
//!
//! Records are grouped into one-second buckets of `rate` consecutive sequence
//! numbers. Sequence numbers start at 1. The bucket of record `n` fixes both
//! when the record may be emitted and the padding it carries:
//!
//! * `time_for(n) = start + floor((n - 1) / rate)` seconds, always relative to
//!   the instant the distribution was built so repeated scheduling never
//!   accumulates drift.
//! * the padding of record `n` is drawn from [`StdRng`] seeded with
//!   `seed_from_u64(bucket)`, so it is reproducible from the bucket index alone
//!   and differs between buckets.
//!
//! Every record is the compact JSON encoding of
//! `["<tag>",<epoch_seconds>,{"log":"<padding>"}]` and is exactly
//! `record_size_bytes` long.

use std::{
    num::{NonZeroU32, NonZeroUsize},
    time::Duration,
};

use rand::{Rng, SeedableRng, distr::Alphanumeric, rngs::StdRng};
use serde::Serialize;
use tracing::{debug, trace};

use crate::Error;

/// Prefix of every record tag.
pub const TAG_PREFIX: &str = "performance-benchmarking";

/// The record envelope. Serializes as a three element JSON array.
#[derive(Serialize)]
struct Envelope<'a>(&'a str, u64, Body<'a>);

#[derive(Serialize)]
struct Body<'a> {
    log: &'a str,
}

#[derive(Debug)]
/// Specifies the distribution of records to be generated.
pub struct RecordDistribution {
    rate: NonZeroU32,
    tag: String,
    padding_length: usize,
    start: Duration,
    /// The bucket and record most recently generated.
    cached: Option<(u64, String)>,
}

impl RecordDistribution {
    /// Create a new `RecordDistribution` anchored at `start`, the wall-clock
    /// time as a duration since the Unix epoch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordTooSmall`] if `record_size_bytes` cannot hold the
    /// tag, timestamp and envelope of a record with empty padding.
    pub fn new(
        record_size_bytes: NonZeroUsize,
        rate: NonZeroU32,
        start: Duration,
    ) -> Result<Self, Error> {
        let tag = format!("{TAG_PREFIX}.size-{record_size_bytes}-rate-{rate}");
        let smallest = encode(&tag, start.as_secs(), "")?;
        let size = record_size_bytes.get();
        let Some(padding_length) = size.checked_sub(smallest.len()) else {
            return Err(Error::RecordTooSmall {
                size,
                minimum: smallest.len(),
                smallest,
            });
        };
        debug!(%tag, padding_length, "record distribution ready");

        Ok(Self {
            rate,
            tag,
            padding_length,
            start,
            cached: None,
        })
    }

    /// The tag carried by every record.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The instant this distribution is anchored at.
    #[must_use]
    pub fn start(&self) -> Duration {
        self.start
    }

    /// The one-second bucket sequence number `n` falls into.
    #[must_use]
    pub fn bucket(&self, n: u64) -> u64 {
        n.saturating_sub(1) / u64::from(self.rate.get())
    }

    /// Absolute wall-clock time at or after which record `n` may be emitted.
    #[must_use]
    pub fn time_for(&self, n: u64) -> Duration {
        self.start + Duration::from_secs(self.bucket(n))
    }

    /// The full content of record `n`.
    ///
    /// The record is regenerated only when `n` enters a new bucket, stamped with
    /// the time `now` returns. Every other record in a bucket is the cached one,
    /// timestamp included, and `now` is not called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the record cannot be encoded.
    pub fn record_for<F>(&mut self, n: u64, now: F) -> Result<&str, Error>
    where
        F: FnOnce() -> Duration,
    {
        let bucket = self.bucket(n);
        let fresh = matches!(&self.cached, Some((cached, _)) if *cached == bucket);
        if !fresh {
            let padding = padding(bucket, self.padding_length);
            let record = encode(&self.tag, now().as_secs(), &padding)?;
            trace!(bucket, bytes = record.len(), "generated record");
            self.cached = Some((bucket, record));
        }
        match &self.cached {
            Some((_, record)) => Ok(record.as_str()),
            None => unreachable!("cache populated above"),
        }
    }
}

/// Alphanumeric padding of `length` bytes, reproducible from `bucket`.
fn padding(bucket: u64, length: usize) -> String {
    StdRng::seed_from_u64(bucket)
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn encode(tag: &str, epoch_seconds: u64, padding: &str) -> Result<String, Error> {
    Ok(serde_json::to_string(&Envelope(
        tag,
        epoch_seconds,
        Body { log: padding },
    ))?)
}
