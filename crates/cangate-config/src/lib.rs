//! Shared configuration for the CANopen gateway daemon and its client.
//!
//! Both binaries resolve the same [`Config`] through `ortho_config`, layering
//! built-in defaults, an optional configuration file, `CANGATE_*` environment
//! variables and command-line flags (highest precedence). The daemon reads the
//! bus and schema settings; the client only needs the socket endpoint.

mod bus;
mod defaults;
mod logging;
mod runtime;
mod socket;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use bus::{
    BusAdapter, BusAdapterParseError, BusSettings, SimulatedNode, SimulatedNodes,
    SimulatedNodesParseError,
};
pub use defaults::{
    DEFAULT_BUS_BITRATE, DEFAULT_BUS_CHANNEL, DEFAULT_LOG_FILTER, DEFAULT_SCAN_WINDOW_MS,
    DEFAULT_SCHEMA_DIR, DEFAULT_SDO_TIMEOUT_MS, DEFAULT_TCP_HOST, DEFAULT_TCP_PORT,
    default_bus_adapter, default_bus_bitrate, default_bus_channel, default_log_filter,
    default_log_filter_string, default_log_format, default_scan_window_ms, default_schema_dir,
    default_sdo_timeout_ms, default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CANGATE")]
pub struct Config {
    /// Endpoint the daemon binds and the client connects to.
    #[serde(default = "default_socket_endpoint")]
    #[ortho_config(default = default_socket_endpoint())]
    pub daemon_socket: SocketEndpoint,
    /// `tracing` filter expression applied by the daemon.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for daemon logs.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Adapter used to reach the bus.
    #[serde(default = "default_bus_adapter")]
    #[ortho_config(default = default_bus_adapter())]
    pub bus_adapter: BusAdapter,
    /// Adapter channel, for example `can0`.
    #[serde(default = "default_bus_channel")]
    #[ortho_config(default = default_bus_channel())]
    pub bus_channel: String,
    /// Nominal bus bitrate in bit/s.
    #[serde(default = "default_bus_bitrate")]
    #[ortho_config(default = default_bus_bitrate())]
    pub bus_bitrate: u32,
    /// Directory against which schema references are resolved.
    #[serde(default = "default_schema_dir")]
    #[ortho_config(default = default_schema_dir())]
    pub schema_dir: Utf8PathBuf,
    /// Per-exchange timeout for object transfers, in milliseconds.
    #[serde(default = "default_sdo_timeout_ms")]
    #[ortho_config(default = default_sdo_timeout_ms())]
    pub sdo_timeout_ms: u64,
    /// Settling window used by node discovery, in milliseconds.
    #[serde(default = "default_scan_window_ms")]
    #[ortho_config(default = default_scan_window_ms())]
    pub scan_window_ms: u64,
    /// Simulated peers attached to the bus when the daemon is built with
    /// simulation support.
    #[serde(default)]
    #[ortho_config(default = SimulatedNodes::default())]
    pub simulated_nodes: SimulatedNodes,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: default_socket_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            bus_adapter: default_bus_adapter(),
            bus_channel: default_bus_channel(),
            bus_bitrate: default_bus_bitrate(),
            schema_dir: default_schema_dir(),
            sdo_timeout_ms: default_sdo_timeout_ms(),
            scan_window_ms: default_scan_window_ms(),
            simulated_nodes: SimulatedNodes::default(),
        }
    }
}

impl Config {
    /// Socket endpoint shared by the daemon and client.
    #[must_use]
    pub fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Directory holding object dictionary files.
    #[must_use]
    pub fn schema_dir(&self) -> &Utf8Path {
        &self.schema_dir
    }

    /// Simulated peers requested for this run.
    #[must_use]
    pub fn simulated_nodes(&self) -> &SimulatedNodes {
        &self.simulated_nodes
    }

    /// Bus connection settings derived from the configuration.
    #[must_use]
    pub fn bus_settings(&self) -> BusSettings {
        BusSettings::from_config(self)
    }
}
