//! Adapter interfaces carrying frames to and from the bus.

#[cfg(feature = "socketcan")]
mod socket_can;
mod virtual_bus;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use cangate_config::{BusAdapter, BusSettings};
use tracing::info;

pub use self::virtual_bus::{VirtualBus, VirtualInterface};
use super::{BUS_TARGET, BusError, CanFrame};

/// A handle that sends and receives frames on one bus channel.
pub trait CanInterface: Send + Sync {
    /// Transmits a frame.
    ///
    /// # Errors
    ///
    /// Returns the adapter's I/O error when the frame cannot be queued.
    fn send(&self, frame: &CanFrame) -> io::Result<()>;

    /// Waits up to `timeout` for the next frame.
    ///
    /// # Errors
    ///
    /// Returns the adapter's I/O error for failures other than a timeout.
    fn recv_timeout(&self, timeout: Duration) -> io::Result<Option<CanFrame>>;

    /// Channel name.
    fn channel(&self) -> &str;
}

/// Opens the adapter selected by `settings`.
///
/// # Errors
///
/// Returns [`BusError::Connection`] when the channel cannot be opened and
/// [`BusError::AdapterUnavailable`] when the adapter was not compiled in.
pub fn open_interface(settings: &BusSettings) -> Result<Arc<dyn CanInterface>, BusError> {
    let interface: Arc<dyn CanInterface> = match settings.adapter {
        BusAdapter::Virtual => Arc::new(VirtualBus::named(&settings.channel).connect()),
        BusAdapter::SocketCan => open_socketcan(settings)?,
    };
    info!(
        target: BUS_TARGET,
        adapter = %settings.adapter,
        channel = %settings.channel,
        bitrate = settings.bitrate,
        "bus interface opened"
    );
    Ok(interface)
}

#[cfg(feature = "socketcan")]
fn open_socketcan(settings: &BusSettings) -> Result<Arc<dyn CanInterface>, BusError> {
    socket_can::SocketCanInterface::open(&settings.channel)
        .map(|interface| Arc::new(interface) as Arc<dyn CanInterface>)
        .map_err(|source| BusError::Connection {
            adapter: settings.adapter,
            channel: settings.channel.clone(),
            source,
        })
}

#[cfg(not(feature = "socketcan"))]
fn open_socketcan(settings: &BusSettings) -> Result<Arc<dyn CanInterface>, BusError> {
    Err(BusError::AdapterUnavailable {
        adapter: settings.adapter,
    })
}
