//! Process supervision: singleton lock, health snapshots, shutdown and the
//! launch sequence.

mod errors;
mod guard;
mod launch;
mod shutdown;

pub use errors::{LaunchError, RuntimeFileAction};
pub use launch::run_daemon;
#[cfg(test)]
pub(crate) use launch::{LaunchPlan, run_daemon_with};
pub use shutdown::{
    ShutdownError, ShutdownReason, ShutdownRequests, ShutdownSignal, ShutdownTrigger,
    SystemShutdownSignal, shutdown_channel,
};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
