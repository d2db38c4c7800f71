use camino::Utf8PathBuf;

use crate::bus::BusAdapter;
use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Loopback host the gateway binds by default.
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";

/// Well-known gateway port.
pub const DEFAULT_TCP_PORT: u16 = 5555;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default adapter channel.
pub const DEFAULT_BUS_CHANNEL: &str = "can0";

/// Default nominal bitrate in bit/s.
pub const DEFAULT_BUS_BITRATE: u32 = 250_000;

/// Directory searched for object dictionary files.
pub const DEFAULT_SCHEMA_DIR: &str = "eds";

/// Per-exchange object transfer timeout.
pub const DEFAULT_SDO_TIMEOUT_MS: u64 = 2_000;

/// Discovery settling window.
pub const DEFAULT_SCAN_WINDOW_MS: u64 = 1_000;

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Computes the default socket endpoint for the daemon.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp(DEFAULT_TCP_HOST, DEFAULT_TCP_PORT)
}

/// Default bus adapter.
#[must_use]
pub fn default_bus_adapter() -> BusAdapter {
    BusAdapter::SocketCan
}

/// Default adapter channel.
#[must_use]
pub fn default_bus_channel() -> String {
    DEFAULT_BUS_CHANNEL.to_owned()
}

/// Default nominal bitrate.
#[must_use]
pub fn default_bus_bitrate() -> u32 {
    DEFAULT_BUS_BITRATE
}

/// Default schema directory.
#[must_use]
pub fn default_schema_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_SCHEMA_DIR)
}

/// Default object transfer timeout in milliseconds.
#[must_use]
pub fn default_sdo_timeout_ms() -> u64 {
    DEFAULT_SDO_TIMEOUT_MS
}

/// Default discovery window in milliseconds.
#[must_use]
pub fn default_scan_window_ms() -> u64 {
    DEFAULT_SCAN_WINDOW_MS
}
