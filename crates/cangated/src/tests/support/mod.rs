//! Test harness shared by the behavioural suites.

mod client;
mod config_loader;
mod daemon;
mod reporter;
mod shutdown;

pub use client::GatewayClient;
pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use daemon::DaemonRun;
pub use reporter::{HealthEvent, RecordingHealthReporter};
