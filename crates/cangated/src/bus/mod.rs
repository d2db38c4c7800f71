//! CANopen bus access for the gateway.
//!
//! The bus layer owns the adapter interface and a background receive thread.
//! Every received frame is routed to three consumers: the object transfer
//! client (server responses on `0x581..=0x5FF`), the emergency store
//! (`0x081..=0x0FF`) and the frame filter table that backs
//! [`BusSession::await_frame`]. Node discovery piggybacks on the same routing.
//!
//! [`BusSession`] is the seam the dispatcher talks to; [`CanopenSession`] is
//! the production implementation.

mod emcy;
mod errors;
mod filters;
mod frame;
mod interface;
mod nmt;
mod pdo;
mod router;
mod scan;
pub(crate) mod sdo;
mod session;
mod sync;
mod types;

pub use errors::BusError;
pub use filters::{FilterRegistration, FilterTable, FrameObserver};
pub use frame::{CanFrame, MAX_CAN_ID, MAX_PAYLOAD, ObservedFrame, epoch_seconds};
pub use interface::{CanInterface, VirtualBus, VirtualInterface, open_interface};
pub use session::{BusConnector, BusSession, CanopenConnector, CanopenSession, SessionSettings};
pub use types::{
    ErrorStateKind, FaultRecord, MappedObject, NmtState, NodeId, ObjectAddress, PdoSlot,
    TpdoConfig, TransferMode,
};

#[cfg(test)]
pub use session::MockBusSession;

pub(crate) use emcy::{EMCY_BASE, describe_emergency};
pub(crate) use nmt::{HEARTBEAT_BASE, NMT_ID};
pub(crate) use sync::SYNC_ID;

/// Tracing target for bus activity.
pub(crate) const BUS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bus");
