//! Network management commands and heartbeat identifiers.

use super::{CanFrame, NmtState, NodeId};

/// Identifier of network management commands.
pub(crate) const NMT_ID: u32 = 0x000;

/// Base identifier of heartbeat and boot-up messages.
pub(crate) const HEARTBEAT_BASE: u32 = 0x700;

/// Command frame driving `node` into `state`.
pub(super) fn command_frame(node: NodeId, state: NmtState) -> CanFrame {
    CanFrame::from_parts(NMT_ID, &[state.command_specifier(), node.get()])
}
