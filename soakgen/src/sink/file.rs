//! The rotating file sink.
//!
//! Records are appended to a single file, one per line, for an agent to tail.
//! Once a fixed number of lines has been written the file is retired to
//! `<path>.old`, replacing whatever was retired before it, and a fresh file
//! is opened in its place.
//!
//! ## Metrics
//!
//! `bytes_written`: Total bytes written, newlines included
//! `records_delivered`: Records appended to the file
//! `rotations`: Number of times the file was retired
//!

use std::{
    ffi::OsString,
    num::NonZeroU64,
    path::{Path, PathBuf},
    time::Duration,
};

use metrics::counter;
use serde::{Deserialize, Serialize};
use soakgen_throttle::{Clock, RealClock};
use tokio::{
    fs,
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{info, warn};

/// How many times opening the file is attempted before giving up.
pub const OPEN_ATTEMPTS: u32 = 10;
/// The pause between two attempts to open the file.
pub const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`File`].
pub enum Error {
    /// Wrapper around [`std::io::Error`].
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to convert, value is 0
    #[error("Value provided must not be zero")]
    Zero,
    /// The file could not be opened, even after retrying.
    #[error("Failed to open {path:?} after {attempts} attempts: {source}")]
    Open {
        /// File path
        path: PathBuf,
        /// Number of attempts made
        attempts: u32,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// The active file could not be retired.
    #[error("Failed to rotate {from:?} to {to:?}: {source}")]
    Rotate {
        /// Active file path
        from: PathBuf,
        /// Retired file path
        to: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
}

fn default_path() -> PathBuf {
    PathBuf::from("tail_log")
}

fn default_rotation_line_limit() -> u64 {
    50_000_000
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of [`File`]
pub struct Config {
    /// The file records are appended to.
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// The number of lines written to the file before it is rotated.
    #[serde(default = "default_rotation_line_limit")]
    pub rotation_line_limit: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: default_path(),
            rotation_line_limit: default_rotation_line_limit(),
        }
    }
}

#[derive(Debug)]
/// The rotating file sink.
///
/// Not safe for concurrent use, every write and rotation assumes a single
/// caller.
pub struct File<C = RealClock> {
    path: PathBuf,
    rotated_path: PathBuf,
    rotation_line_limit: NonZeroU64,
    lines_written: u64,
    /// `None` only between retiring the old file and opening the new one.
    fp: Option<BufWriter<fs::File>>,
    clock: C,
}

impl<C> File<C>
where
    C: Clock,
{
    /// Create a new [`File`], opening `config.path` for appending.
    ///
    /// # Errors
    ///
    /// Creation will fail if the rotation limit is zero or if the file cannot
    /// be opened within [`OPEN_ATTEMPTS`] attempts.
    pub async fn new(config: &Config, clock: C) -> Result<Self, Error> {
        let rotation_line_limit =
            NonZeroU64::new(config.rotation_line_limit).ok_or(Error::Zero)?;
        let fp = open(&config.path, &clock).await?;

        Ok(Self {
            path: config.path.clone(),
            rotated_path: rotated_path(&config.path),
            rotation_line_limit,
            lines_written: 0,
            fp: Some(fp),
            clock,
        })
    }

    /// The path of the active file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path active files are retired to.
    pub fn rotated_path(&self) -> &Path {
        &self.rotated_path
    }

    /// Append `record` and a newline to the active file, rotating it if this
    /// line reaches the rotation limit.
    ///
    /// # Errors
    ///
    /// Function will return an error if the write fails or if rotation cannot
    /// rename the file or reopen it.
    pub async fn deliver(&mut self, record: &str) -> Result<(), Error> {
        let fp = match self.fp.take() {
            Some(fp) => fp,
            None => open(&self.path, &self.clock).await?,
        };
        let fp = self.fp.insert(fp);
        fp.write_all(record.as_bytes()).await?;
        fp.write_all(b"\n").await?;

        counter!("bytes_written", "component_name" => "file").increment(record.len() as u64 + 1);
        counter!("records_delivered", "component_name" => "file").increment(1);

        self.lines_written += 1;
        if self.lines_written >= self.rotation_line_limit.get() {
            self.rotate().await?;
        }
        Ok(())
    }

    /// Flush buffered lines to the active file.
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying write fails.
    pub async fn flush(&mut self) -> Result<(), Error> {
        if let Some(fp) = self.fp.as_mut() {
            fp.flush().await?;
        }
        Ok(())
    }

    async fn rotate(&mut self) -> Result<(), Error> {
        // Close the active file before renaming it. Some platforms refuse to
        // rename an open file.
        if let Some(mut fp) = self.fp.take() {
            fp.flush().await?;
        }
        fs::rename(&self.path, &self.rotated_path)
            .await
            .map_err(|source| Error::Rotate {
                from: self.path.clone(),
                to: self.rotated_path.clone(),
                source: Box::new(source),
            })?;
        info!("Rotated file to {}.", self.rotated_path.display());
        counter!("rotations", "component_name" => "file").increment(1);

        self.fp = Some(open(&self.path, &self.clock).await?);
        self.lines_written = 0;
        Ok(())
    }
}

/// Open `path` for appending. The rename that precedes a reopen is not
/// guaranteed to be atomic everywhere, so failures are retried a bounded
/// number of times.
async fn open<C>(path: &Path, clock: &C) -> Result<BufWriter<fs::File>, Error>
where
    C: Clock,
{
    let mut attempt = 1;
    loop {
        match fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
        {
            Ok(fp) => return Ok(BufWriter::new(fp)),
            Err(source) if attempt < OPEN_ATTEMPTS => {
                warn!(
                    "Retrying opening {path} due to {source}",
                    path = path.display()
                );
                clock.sleep(OPEN_RETRY_DELAY).await;
                attempt += 1;
            }
            Err(source) => {
                return Err(Error::Open {
                    path: path.to_path_buf(),
                    attempts: attempt,
                    source: Box::new(source),
                });
            }
        }
    }
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut rotated = OsString::from(path.as_os_str());
    rotated.push(".old");
    PathBuf::from(rotated)
}

#[cfg(test)]
mod test {
    use soakgen_throttle::{Clock, ManualClock};

    use super::{Config, Error, File, OPEN_ATTEMPTS, OPEN_RETRY_DELAY};

    fn config(dir: &tempfile::TempDir, rotation_line_limit: u64) -> Config {
        Config {
            path: dir.path().join("tail_log"),
            rotation_line_limit,
        }
    }

    fn lines(path: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .expect("readable file")
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn rotates_exactly_at_the_limit() {
        let dir = tempfile::tempdir().expect("directory could not be created");
        let mut sink = File::new(&config(&dir, 3), ManualClock::default())
            .await
            .expect("sink");

        sink.deliver("one").await.expect("deliver");
        sink.deliver("two").await.expect("deliver");
        sink.flush().await.expect("flush");
        assert!(!sink.rotated_path().exists());
        assert_eq!(lines(sink.path()), vec!["one", "two"]);

        sink.deliver("three").await.expect("deliver");
        assert_eq!(lines(sink.rotated_path()), vec!["one", "two", "three"]);
        assert_eq!(std::fs::read(sink.path()).expect("active file").len(), 0);
    }

    #[tokio::test]
    async fn rotation_replaces_the_retired_file() {
        let dir = tempfile::tempdir().expect("directory could not be created");
        let mut sink = File::new(&config(&dir, 2), ManualClock::default())
            .await
            .expect("sink");

        for record in ["a", "b", "c", "d", "e"] {
            sink.deliver(record).await.expect("deliver");
        }
        sink.flush().await.expect("flush");

        assert_eq!(lines(sink.rotated_path()), vec!["c", "d"]);
        assert_eq!(lines(sink.path()), vec!["e"]);
    }

    #[tokio::test]
    async fn appends_to_an_existing_file() {
        let dir = tempfile::tempdir().expect("directory could not be created");
        let config = config(&dir, 10);
        std::fs::write(&config.path, "earlier\n").expect("seed file");

        let mut sink = File::new(&config, ManualClock::default())
            .await
            .expect("sink");
        sink.deliver("later").await.expect("deliver");
        sink.flush().await.expect("flush");

        assert_eq!(lines(&config.path), vec!["earlier", "later"]);
    }

    #[tokio::test]
    async fn open_failure_is_fatal_after_bounded_retries() {
        let dir = tempfile::tempdir().expect("directory could not be created");
        let config = Config {
            path: dir.path().join("missing").join("tail_log"),
            rotation_line_limit: 10,
        };
        let clock = ManualClock::default();

        let err = File::new(&config, clock.clone())
            .await
            .expect_err("parent directory does not exist");
        match err {
            Error::Open { attempts, .. } => assert_eq!(attempts, OPEN_ATTEMPTS),
            other => panic!("unexpected error: {other}"),
        }
        // One pause between each pair of attempts.
        assert_eq!(clock.now(), OPEN_RETRY_DELAY * (OPEN_ATTEMPTS - 1));
    }

    #[tokio::test]
    async fn zero_rotation_limit_is_rejected() {
        let dir = tempfile::tempdir().expect("directory could not be created");
        let config = config(&dir, 0);
        let err = File::new(&config, ManualClock::default())
            .await
            .expect_err("zero limit");
        assert!(matches!(err, Error::Zero));
        assert!(!config.path.exists());
    }
}
