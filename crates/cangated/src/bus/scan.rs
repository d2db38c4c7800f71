//! Node discovery.
//!
//! Discovery probes every address with a device-type read and records which
//! nodes produce traffic while the settling window is open.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::sdo::{REQUEST_BASE, command, initiate_payload};
use super::{CanFrame, NodeId};

/// Services whose identifiers carry the sender's node address.
const SERVICES: [u32; 7] = [0x080, 0x180, 0x280, 0x380, 0x480, 0x580, 0x700];

const DEVICE_TYPE: u16 = 0x1000;

/// Nodes seen on the bus since the last reset.
#[derive(Default)]
pub(super) struct NodeTracker {
    seen: Mutex<BTreeSet<NodeId>>,
}

impl NodeTracker {
    /// Records the sender of a frame when its identifier is node-addressed.
    pub(super) fn observe(&self, id: u32) {
        if !SERVICES.contains(&(id & !0x7F)) {
            return;
        }
        if let Some(node) = NodeId::from_cob_id(id) {
            self.lock().insert(node);
        }
    }

    /// Forgets every node.
    pub(super) fn reset(&self) {
        self.lock().clear();
    }

    /// Nodes seen so far, in ascending order.
    pub(super) fn nodes(&self) -> Vec<NodeId> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<NodeId>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One device-type read request per valid address.
pub(super) fn probe_frames() -> impl Iterator<Item = CanFrame> {
    NodeId::all().map(|node| {
        CanFrame::from_parts(
            REQUEST_BASE + u32::from(node.get()),
            &initiate_payload(command::INITIATE_UPLOAD, DEVICE_TYPE, 0, [0; 4]),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_node_addressed_services_only() {
        let tracker = NodeTracker::default();
        tracker.observe(0x703);
        tracker.observe(0x585);
        tracker.observe(0x080);
        tracker.observe(0x000);
        tracker.observe(0x605);
        let nodes: Vec<u8> = tracker.nodes().into_iter().map(NodeId::get).collect();
        assert_eq!(nodes, vec![3, 5]);

        tracker.reset();
        assert!(tracker.nodes().is_empty());
    }

    #[test]
    fn probes_every_address() {
        let frames: Vec<CanFrame> = probe_frames().collect();
        assert_eq!(frames.len(), 127);
        assert_eq!(frames.first().map(CanFrame::id), Some(0x601));
        assert_eq!(frames.last().map(CanFrame::id), Some(0x67F));
        assert_eq!(
            frames.first().map(|frame| frame.data().to_vec()),
            Some(vec![0x40, 0x00, 0x10, 0x00, 0, 0, 0, 0])
        );
    }
}
