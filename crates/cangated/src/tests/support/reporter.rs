//! Health reporter double that records lifecycle events.

use std::sync::Mutex;

use cangate_config::{BusSettings, Config};

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    BusConnected(String),
    SimulatedNodeStarted(u8),
    GatewayClosed,
}

#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn bus_connected(&self, settings: &BusSettings) {
        self.record(HealthEvent::BusConnected(settings.channel.clone()));
    }

    fn simulated_node_started(&self, node: u8) {
        self.record(HealthEvent::SimulatedNodeStarted(node));
    }

    fn gateway_closed(&self) {
        self.record(HealthEvent::GatewayClosed);
    }
}
