//! soakgen sinks
//!
//! A sink hands fully-formed records to the ingestion point of a log agent,
//! recovering from failure in whatever way suits its medium. There are two,
//! mirroring the two ways an agent typically ingests logs:
//!
//! * [`file::File`] appends to a local file the agent tails, rotating it
//!   after a fixed number of lines.
//! * [`socket::Socket`] pushes to the agent's forward listener, reconnecting
//!   forever rather than dropping a record.
//!
//! Every sink is owned by exactly one scheduler and is never shared.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use soakgen_throttle::{Clock, RealClock};

pub mod file;
pub mod socket;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Sink`] implementations.
pub enum Error {
    /// See [`crate::sink::file::Error`] for details.
    #[error(transparent)]
    File(#[from] file::Error),
    /// See [`crate::sink::socket::Error`] for details.
    #[error(transparent)]
    Socket(#[from] socket::Error),
}

impl Error {
    /// Whether this error is a requested shutdown rather than a failure.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::Socket(socket::Error::Shutdown))
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configuration for [`Output`]
pub enum Config {
    /// See [`crate::sink::file::Config`] for details.
    File(file::Config),
    /// See [`crate::sink::socket::Config`] for details.
    Socket(socket::Config),
}

#[async_trait]
/// A destination for records.
pub trait Sink: Send {
    /// Hand `record` to the ingestion point. Returns once the record has been
    /// accepted or the sink has given up on it for good.
    async fn deliver(&mut self, record: &str) -> Result<(), Error>;

    /// Make every delivered record visible to the ingestion point.
    async fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug)]
/// The configured sink.
///
/// All sinks supported by soakgen are a variant of this enum. Please see
/// variant documentation for details.
pub enum Output<C = RealClock> {
    /// See [`crate::sink::file::File`] for details.
    File(file::File<C>),
    /// See [`crate::sink::socket::Socket`] for details.
    Socket(socket::Socket<C>),
}

impl<C> Output<C>
where
    C: Clock + 'static,
{
    /// Create a new [`Output`] from its configuration.
    ///
    /// # Errors
    ///
    /// Function will return an error if the file sink cannot open its file.
    /// The socket sink never fails here, it connects lazily.
    pub async fn new(
        config: &Config,
        clock: C,
        shutdown: soakgen_signal::Watcher,
    ) -> Result<Self, Error> {
        let output = match config {
            Config::File(conf) => Self::File(file::File::new(conf, clock).await?),
            Config::Socket(conf) => Self::Socket(socket::Socket::new(conf, clock, shutdown)),
        };
        Ok(output)
    }
}

#[async_trait]
impl<C> Sink for file::File<C>
where
    C: Clock + 'static,
{
    async fn deliver(&mut self, record: &str) -> Result<(), Error> {
        Ok(file::File::deliver(self, record).await?)
    }

    async fn flush(&mut self) -> Result<(), Error> {
        Ok(file::File::flush(self).await?)
    }
}

#[async_trait]
impl<C> Sink for socket::Socket<C>
where
    C: Clock + 'static,
{
    async fn deliver(&mut self, record: &str) -> Result<(), Error> {
        Ok(socket::Socket::deliver(self, record).await?)
    }
}

#[async_trait]
impl<C> Sink for Output<C>
where
    C: Clock + 'static,
{
    async fn deliver(&mut self, record: &str) -> Result<(), Error> {
        match self {
            Output::File(inner) => Sink::deliver(inner, record).await,
            Output::Socket(inner) => Sink::deliver(inner, record).await,
        }
    }

    async fn flush(&mut self) -> Result<(), Error> {
        match self {
            Output::File(inner) => Sink::flush(inner).await,
            Output::Socket(inner) => Sink::flush(inner).await,
        }
    }
}
