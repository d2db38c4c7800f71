//! Emergency (EMCY) message bookkeeping.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ErrorStateKind, FaultRecord, NodeId, ObservedFrame};

/// Base identifier of emergency messages.
pub(crate) const EMCY_BASE: u32 = 0x080;

/// Records kept in each node's log.
pub(super) const LOG_CAPACITY: usize = 256;

#[derive(Default)]
struct NodeFaults {
    active: Vec<FaultRecord>,
    log: VecDeque<FaultRecord>,
}

/// Active and historical emergencies per node.
#[derive(Default)]
pub(super) struct EmergencyStore {
    nodes: Mutex<HashMap<NodeId, NodeFaults>>,
}

impl EmergencyStore {
    /// Records an emergency frame from `node`. Codes with a zero high byte
    /// report an error reset and clear the active set.
    pub(super) fn record(&self, node: NodeId, observed: &ObservedFrame) {
        let payload = observed.frame.padded();
        let [code_low, code_high, register, data @ ..] = payload;
        let record = FaultRecord {
            code: u16::from_le_bytes([code_low, code_high]),
            register,
            data: data.to_vec(),
            timestamp: observed.timestamp,
        };

        let mut nodes = self.lock();
        let faults = nodes.entry(node).or_default();
        if record.code & 0xFF00 == 0 {
            faults.active.clear();
        } else {
            faults.active.push(record.clone());
        }
        faults.log.push_back(record);
        while faults.log.len() > LOG_CAPACITY {
            faults.log.pop_front();
        }
    }

    /// Copies the requested record set for `node`.
    pub(super) fn snapshot(&self, node: NodeId, kind: ErrorStateKind) -> Vec<FaultRecord> {
        let nodes = self.lock();
        let Some(faults) = nodes.get(&node) else {
            return Vec::new();
        };
        match kind {
            ErrorStateKind::Active => faults.active.clone(),
            ErrorStateKind::Log => faults.log.iter().cloned().collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NodeId, NodeFaults>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

const DESCRIPTIONS: &[(u16, u16, &str)] = &[
    (0x0000, 0xFF00, "Error Reset / No Error"),
    (0x1000, 0xFF00, "Generic Error"),
    (0x2000, 0xF000, "Current"),
    (0x3000, 0xF000, "Voltage"),
    (0x4000, 0xF000, "Temperature"),
    (0x5000, 0xFF00, "Device Hardware"),
    (0x6000, 0xF000, "Device Software"),
    (0x7000, 0xFF00, "Additional Modules"),
    (0x8110, 0xFFFF, "CAN Overrun"),
    (0x8120, 0xFFFF, "CAN Error Passive"),
    (0x8130, 0xFFFF, "Life Guard / Heartbeat Error"),
    (0x8140, 0xFFFF, "Recovered from Bus-Off"),
    (0x8000, 0xF000, "Monitoring"),
    (0x9000, 0xFF00, "External Error"),
    (0xF000, 0xFF00, "Additional Functions"),
    (0xFF00, 0xFF00, "Device Specific"),
];

/// Describes an emergency code by its most specific known class.
pub(crate) fn describe_emergency(code: u16) -> &'static str {
    DESCRIPTIONS
        .iter()
        .find(|(class, mask, _)| code & mask == *class)
        .map_or("", |(_, _, text)| text)
}
