//! CANopen command gateway daemon.
//!
//! The daemon owns one bus session and serves newline-delimited JSON
//! commands over a TCP or Unix socket. Each request names a command such as
//! `sdo_upload` or `nmt_change_state`; the dispatcher validates its
//! parameters, runs the bus operation and answers with exactly one reply
//! line. Errors never end the daemon: they are reported to the client as
//! `err: <reason>` replies carrying an error kind.
//!
//! Startup follows a fixed sequence: configuration is loaded through
//! [`cangate_config`], telemetry is installed, the singleton lock and health
//! snapshot are written, the bus is opened and, when built with the
//! `sim-network` feature, simulated peers are attached to it. Shutdown is
//! requested either by a termination signal or by the `turn_off` command.

mod bootstrap;
pub mod bus;
pub mod dictionary;
pub mod dispatch;
mod health;
mod process;
#[cfg(any(test, feature = "sim-network"))]
pub mod sim;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    LaunchError, RuntimeFileAction, ShutdownError, ShutdownReason, ShutdownRequests,
    ShutdownSignal, ShutdownTrigger, SystemShutdownSignal, run_daemon, shutdown_channel,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
