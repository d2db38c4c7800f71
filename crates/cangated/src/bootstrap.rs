//! Gateway bootstrap: configuration, telemetry, bus session and simulated
//! peers.

use std::sync::Arc;

use cangate_config::{Config, SocketPreparationError};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use crate::bus::{BusConnector, BusError};
use crate::dictionary::SchemaDirectory;
use crate::dispatch::Gateway;
use crate::health::HealthReporter;
#[cfg(any(test, feature = "sim-network"))]
use crate::sim::{SimulatedNetwork, SimulationError};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader error when sources cannot be merged.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a configuration resolved earlier.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare daemon socket: {source}")]
    Socket {
        #[source]
        source: SocketPreparationError,
    },
    /// The bus adapter could not be opened.
    #[error("failed to open the bus: {source}")]
    Bus {
        #[source]
        source: BusError,
    },
    /// Declared simulated peers could not be started.
    #[cfg(any(test, feature = "sim-network"))]
    #[error("failed to start simulated peers: {source}")]
    Simulation {
        #[source]
        source: SimulationError,
    },
}

/// Result of a successful bootstrap invocation.
pub struct Daemon {
    config: Config,
    gateway: Gateway,
    telemetry: TelemetryHandle,
}

impl Daemon {
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Hands the gateway over to the dispatch layer.
    #[must_use]
    pub fn into_gateway(self) -> Gateway {
        self.gateway
    }
}

/// Bootstraps the gateway using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] when any stage fails; the reporter sees the
/// failure first.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    connector: &dyn BusConnector,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();
    bootstrap_stages(loader, reporter.as_ref(), connector).inspect_err(|error| {
        reporter.bootstrap_failed(error);
    })
}

fn bootstrap_stages(
    loader: &dyn ConfigLoader,
    reporter: &dyn HealthReporter,
    connector: &dyn BusConnector,
) -> Result<Daemon, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    config
        .daemon_socket()
        .prepare_filesystem()
        .map_err(|source| BootstrapError::Socket { source })?;

    let settings = config.bus_settings();
    let session = connector
        .connect(&settings)
        .map_err(|source| BootstrapError::Bus { source })?;
    reporter.bus_connected(&settings);

    let schemas = SchemaDirectory::new(config.schema_dir());
    let gateway = Gateway::new(session, Box::new(schemas.clone()));
    let gateway = attach_simulation(&config, reporter, &schemas, gateway)?;

    reporter.bootstrap_succeeded(&config);
    Ok(Daemon {
        config,
        gateway,
        telemetry,
    })
}

#[cfg(any(test, feature = "sim-network"))]
fn attach_simulation(
    config: &Config,
    reporter: &dyn HealthReporter,
    schemas: &SchemaDirectory,
    gateway: Gateway,
) -> Result<Gateway, BootstrapError> {
    let declared = config.simulated_nodes();
    if declared.is_empty() {
        return Ok(gateway);
    }
    let network = SimulatedNetwork::start(&config.bus_settings(), declared, schemas)
        .map_err(|source| BootstrapError::Simulation { source })?;
    for node in network.node_ids() {
        reporter.simulated_node_started(node.get());
    }
    Ok(gateway.with_simulation(network))
}

#[cfg(not(any(test, feature = "sim-network")))]
fn attach_simulation(
    config: &Config,
    _reporter: &dyn HealthReporter,
    _schemas: &SchemaDirectory,
    gateway: Gateway,
) -> Result<Gateway, BootstrapError> {
    if !config.simulated_nodes().is_empty() {
        tracing::warn!(
            target: concat!(env!("CARGO_PKG_NAME"), "::bootstrap"),
            nodes = %config.simulated_nodes(),
            "simulated peers declared but simulation support is not built in"
        );
    }
    Ok(gateway)
}
