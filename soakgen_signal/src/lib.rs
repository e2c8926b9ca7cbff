//! Module to signal shutdown in soakgen.
//!
//! The generator is a single control loop that may block indefinitely, either
//! because it was asked to produce records forever or because the forwarding
//! listener never becomes reachable. This crate gives that loop an explicit way
//! out: a `Broadcaster` signals once and every `Watcher` observes it.
//!
//! Unlike a channel, dropping the `Broadcaster` does NOT count as a signal. A
//! run that nobody intends to stop behaves exactly as if this mechanism did not
//! exist.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]

use tokio::sync::watch;
use tracing::debug;

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = watch::channel(false);
    (Watcher { receiver }, Broadcaster { sender })
}

#[derive(Debug)]
/// Mechanism to notify one or more `Watcher` instances that shutdown has been
/// requested.
pub struct Broadcaster {
    sender: watch::Sender<bool>,
}

impl Broadcaster {
    /// Send the signal through to every `Watcher`, present and future clones
    /// included.
    pub fn signal(self) {
        debug!(watchers = self.sender.receiver_count(), "broadcasting shutdown");
        self.sender.send_replace(true);
    }
}

#[derive(Debug, Clone)]
/// Mechanism to watch for the shutdown signal.
pub struct Watcher {
    receiver: watch::Receiver<bool>,
}

impl Watcher {
    /// Wait for the shutdown signal. Returns immediately if the signal was
    /// already sent, any number of times.
    ///
    /// If the `Broadcaster` is dropped without signalling this future never
    /// resolves.
    pub async fn recv(&mut self) {
        if self.receiver.wait_for(|signalled| *signalled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Check whether the shutdown signal has been sent, without waiting.
    #[must_use]
    pub fn try_recv(&self) -> bool {
        *self.receiver.borrow()
    }
}
