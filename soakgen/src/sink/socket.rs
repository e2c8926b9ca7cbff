//! The reconnecting socket sink.
//!
//! This sink pushes records over TCP to the forward listener of a logging
//! agent. A record is never dropped: any connect or write failure discards the
//! connection, waits a fixed delay and tries the same record again on a fresh
//! connection, for as long as it takes. A listener that never comes up stalls
//! the generator, which is preferred to silently losing test data.
//!
//! ## Metrics
//!
//! `bytes_written`: Bytes sent successfully
//! `records_delivered`: Records sent successfully
//! `request_failure`: Number of failed writes; each occurrence causes a reconnect
//! `connection_failure`: Number of connection failures
//!

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

use metrics::counter;
use serde::{Deserialize, Serialize};
use soakgen_throttle::{Clock, RealClock};
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::{error, info};

/// The fluentd `in_forward` listener of a logging agent on this host.
pub const DEFAULT_FORWARD_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 24224));

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Socket`].
pub enum Error {
    /// Error connecting to the forward listener
    #[error("Failed to connect to TCP address {addr}: {source}")]
    Connect {
        /// Target address
        addr: SocketAddr,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// Error writing to the forward listener
    #[error("Failed to send message to TCP address {addr}: {source}")]
    Write {
        /// Target address
        addr: SocketAddr,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// Shutdown was signalled while waiting to retry
    #[error("Shutdown signalled before the record could be sent")]
    Shutdown,
}

fn default_addr() -> SocketAddr {
    DEFAULT_FORWARD_ADDR
}

fn default_retry_delay_seconds() -> u64 {
    1
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
/// Configuration of [`Socket`]
pub struct Config {
    /// The address of the forward listener, must be a valid `SocketAddr`
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
    /// The number of seconds to sleep between each retry when the listener
    /// cannot be reached or written to.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

#[derive(Debug)]
/// The reconnecting socket sink.
///
/// No connection is made until the first record is delivered.
pub struct Socket<C = RealClock> {
    addr: SocketAddr,
    retry_delay: Duration,
    /// `None` is a fresh, not yet connected handle.
    connection: Option<TcpStream>,
    clock: C,
    shutdown: soakgen_signal::Watcher,
}

impl<C> Socket<C>
where
    C: Clock,
{
    /// Create a new [`Socket`] instance. Does not connect.
    pub fn new(config: &Config, clock: C, shutdown: soakgen_signal::Watcher) -> Self {
        info!(addr = %config.addr, "Log generator ready to produce traffic.");
        Self {
            addr: config.addr,
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            connection: None,
            clock,
            shutdown,
        }
    }

    /// Whether a connection to the listener is currently held.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Send `record`, retrying without limit on failure.
    ///
    /// # Errors
    ///
    /// The only error is [`Error::Shutdown`], returned when shutdown is
    /// signalled while waiting to retry. Connect and write failures are logged
    /// and retried.
    pub async fn deliver(&mut self, record: &str) -> Result<(), Error> {
        loop {
            let Err(err) = self.try_deliver(record.as_bytes()).await else {
                return Ok(());
            };
            error!(
                "{err}. Please make sure the logging agent is running with its forward input listening on {addr}.",
                addr = self.addr
            );
            info!(
                "Sleep for {secs} seconds then try again.",
                secs = self.retry_delay.as_secs()
            );

            tokio::select! {
                biased;

                () = self.shutdown.recv() => {
                    info!("shutdown signal received");
                    return Err(Error::Shutdown);
                }
                () = self.clock.sleep(self.retry_delay) => {}
            }
        }
    }

    async fn try_deliver(&mut self, record: &[u8]) -> Result<(), Error> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                info!("Connecting to forward listener at {addr}.", addr = self.addr);
                let connection = TcpStream::connect(self.addr).await.map_err(|source| {
                    counter!("connection_failure", "component_name" => "socket").increment(1);
                    Error::Connect {
                        addr: self.addr,
                        source: Box::new(source),
                    }
                })?;
                info!("Successfully connected.");
                connection
            }
        };

        let connection = self.connection.insert(connection);
        if let Err(source) = connection.write_all(record).await {
            counter!("request_failure", "component_name" => "socket").increment(1);
            // A failed stream is never written to again. The next attempt
            // starts from a fresh handle.
            self.connection = None;
            info!("Closed connection.");
            return Err(Error::Write {
                addr: self.addr,
                source: Box::new(source),
            });
        }

        counter!("bytes_written", "component_name" => "socket").increment(record.len() as u64);
        counter!("records_delivered", "component_name" => "socket").increment(1);
        Ok(())
    }
}
