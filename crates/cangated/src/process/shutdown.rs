//! Shutdown coordination between signals and the `turn_off` command.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{info, warn};

use super::PROCESS_TARGET;

/// Why the gateway is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A termination signal arrived.
    Signal(i32),
    /// A client issued `turn_off`.
    TurnOff,
}

/// Sending half of the shutdown channel; cloned into connection handlers.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    sender: Sender<ShutdownReason>,
}

impl ShutdownTrigger {
    /// Asks the daemon to stop. Requests after the first are ignored.
    pub fn request(&self, reason: ShutdownReason) {
        if self.sender.send(reason).is_err() {
            info!(
                target: PROCESS_TARGET,
                ?reason,
                "shutdown already in progress"
            );
        }
    }
}

/// Receiving half of the shutdown channel.
#[derive(Debug)]
pub struct ShutdownRequests {
    receiver: Receiver<ShutdownReason>,
}

impl ShutdownRequests {
    /// Blocks until the first shutdown request.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Disconnected`] when every trigger is gone.
    pub fn wait(&self) -> Result<ShutdownReason, ShutdownError> {
        self.receiver.recv().map_err(|_| ShutdownError::Disconnected)
    }
}

/// Creates a connected trigger and request pair.
#[must_use]
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownRequests) {
    let (sender, receiver) = mpsc::channel();
    (ShutdownTrigger { sender }, ShutdownRequests { receiver })
}

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed, forwarding external events to
    /// `trigger` and reporting the first request seen on `requests`.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the mechanism cannot be installed or
    /// the channel closes.
    fn wait(
        &self,
        trigger: &ShutdownTrigger,
        requests: &ShutdownRequests,
    ) -> Result<ShutdownReason, ShutdownError>;
}

/// Errors reported by shutdown listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Every shutdown trigger was dropped before a request arrived.
    #[error("shutdown channel closed without a request")]
    Disconnected,
}

/// Waits for SIGTERM, SIGINT, SIGQUIT or SIGHUP, or for a `turn_off`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(
        &self,
        trigger: &ShutdownTrigger,
        requests: &ShutdownRequests,
    ) -> Result<ShutdownReason, ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();
        let forward = trigger.clone();
        let forwarder = thread::Builder::new()
            .name("cangate-signals".to_owned())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    forward.request(ShutdownReason::Signal(signal));
                }
            })
            .map_err(|source| ShutdownError::Install { source })?;

        let reason = requests.wait();
        handle.close();
        if forwarder.join().is_err() {
            warn!(target: PROCESS_TARGET, "signal forwarding thread panicked");
        }
        let reason = reason?;
        info!(target: PROCESS_TARGET, ?reason, "shutdown requested");
        Ok(reason)
    }
}
