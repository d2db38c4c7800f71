//! Structured health reporting for gateway lifecycle events.

use std::sync::Arc;

use cangate_config::{BusSettings, Config};

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the bus session is open.
    fn bus_connected(&self, settings: &BusSettings);

    /// Invoked for every simulated peer attached at startup.
    fn simulated_node_started(&self, node: u8);

    /// Invoked after the gateway released the bus during shutdown.
    fn gateway_closed(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn bus_connected(&self, settings: &BusSettings) {
        (**self).bus_connected(settings);
    }

    fn simulated_node_started(&self, node: u8) {
        (**self).simulated_node_started(node);
    }

    fn gateway_closed(&self) {
        (**self).gateway_closed();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting gateway bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.daemon_socket(),
            schema_dir = %config.schema_dir(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "gateway bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "gateway bootstrap failed"
        );
    }

    fn bus_connected(&self, settings: &BusSettings) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bus_connected",
            adapter = %settings.adapter,
            channel = %settings.channel,
            bitrate = settings.bitrate,
            "bus session open"
        );
    }

    fn simulated_node_started(&self, node: u8) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "simulated_node_started",
            node,
            "simulated peer attached"
        );
    }

    fn gateway_closed(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "gateway_closed",
            "gateway released the bus"
        );
    }
}
