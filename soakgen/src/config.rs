//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.
use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::sink;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
}

/// Default size of every record, in bytes.
pub const DEFAULT_RECORD_SIZE_BYTES: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(size) => size,
    None => panic!("record size must be non-zero"),
};
/// Default number of records emitted per second.
pub const DEFAULT_RATE: NonZeroU32 = match NonZeroU32::new(10) {
    Some(rate) => rate,
    None => panic!("rate must be non-zero"),
};

fn default_record_size_bytes() -> NonZeroUsize {
    DEFAULT_RECORD_SIZE_BYTES
}

fn default_rate() -> NonZeroU32 {
    DEFAULT_RATE
}

fn default_count() -> i64 {
    -1
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The size of each record in bytes, the newline of the file sink
    /// excluded.
    #[serde(default = "default_record_size_bytes")]
    pub record_size_bytes: NonZeroUsize,
    /// The number of records emitted per second.
    #[serde(default = "default_rate")]
    pub rate: NonZeroU32,
    /// How many records to emit. If not positive, emit indefinitely.
    #[serde(default = "default_count")]
    pub count: i64,
    /// The sink records are delivered to
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub sink: sink::Config,
    /// The method by which to express telemetry
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub telemetry: Option<Telemetry>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Defines the manner of soakgen's own telemetry.
pub enum Telemetry {
    /// In prometheus mode soakgen will emit its internal telemetry for
    /// scraping at a prometheus poll endpoint.
    Prometheus {
        /// Address and port for prometheus exporter
        addr: SocketAddr,
    },
}

impl Config {
    /// Parse a [`Config`] from YAML.
    ///
    /// # Errors
    ///
    /// Function will return an error if `contents` is not a valid
    /// configuration.
    pub fn try_from_yaml(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Read and parse the [`Config`] at `path`.
    ///
    /// # Errors
    ///
    /// Function will return an error if `path` cannot be read or does not hold
    /// a valid configuration.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::try_from_yaml(&contents)
    }

    /// The number of records to emit, `None` meaning no limit.
    #[must_use]
    pub fn count_limit(&self) -> Option<NonZeroU64> {
        u64::try_from(self.count).ok().and_then(NonZeroU64::new)
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, num::NonZeroU64, path::PathBuf};

    use super::{Config, Telemetry};
    use crate::sink::{self, file, socket};

    #[test]
    fn config_deserializes_file_sink() {
        let contents = r"
record_size_bytes: 512
rate: 1000
count: 10
sink:
  file:
    path: /tmp/tail_log
    rotation_line_limit: 5
";
        let config = Config::try_from_yaml(contents).expect("Failed to deserialize");
        assert_eq!(config.record_size_bytes.get(), 512);
        assert_eq!(config.rate.get(), 1000);
        assert_eq!(config.count_limit(), NonZeroU64::new(10));
        assert_eq!(
            config.sink,
            sink::Config::File(file::Config {
                path: PathBuf::from("/tmp/tail_log"),
                rotation_line_limit: 5,
            })
        );
        assert_eq!(config.telemetry, None);
    }

    #[test]
    fn config_defaults_socket_sink() {
        let contents = r"
sink:
  socket: {}
telemetry:
  prometheus:
    addr: 0.0.0.0:9000
";
        let config = Config::try_from_yaml(contents).expect("Failed to deserialize");
        assert_eq!(config.record_size_bytes, super::DEFAULT_RECORD_SIZE_BYTES);
        assert_eq!(config.rate, super::DEFAULT_RATE);
        assert_eq!(config.record_size_bytes.get(), 100);
        assert_eq!(config.rate.get(), 10);
        assert_eq!(config.count_limit(), None);
        assert_eq!(config.sink, sink::Config::Socket(socket::Config::default()));
        assert_eq!(
            config.telemetry,
            Some(Telemetry::Prometheus {
                addr: "0.0.0.0:9000".parse::<SocketAddr>().expect("addr"),
            })
        );
    }

    #[test]
    fn non_positive_count_is_unbounded() {
        for count in ["0", "-1", "-50"] {
            let contents = format!("count: {count}\nsink:\n  socket: {{}}\n");
            let config = Config::try_from_yaml(&contents).expect("Failed to deserialize");
            assert_eq!(config.count_limit(), None, "count {count}");
        }
    }

    #[test]
    fn zero_rate_is_rejected() {
        let contents = "rate: 0\nsink:\n  socket: {}\n";
        assert!(Config::try_from_yaml(contents).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let contents = "sink:\n  socket:\n    port: 24224\n";
        assert!(Config::try_from_yaml(contents).is_err());
    }
}
