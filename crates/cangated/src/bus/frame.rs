//! CAN frames as seen by the gateway.

use std::time::{SystemTime, UNIX_EPOCH};

use super::BusError;

/// Largest payload a classic CAN frame carries.
pub const MAX_PAYLOAD: usize = 8;

/// Largest 29-bit extended identifier.
pub const MAX_CAN_ID: u32 = 0x1FFF_FFFF;

const MAX_STANDARD_ID: u32 = 0x7FF;

/// A classic CAN data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    data: Vec<u8>,
}

impl CanFrame {
    /// Builds a frame after validating the identifier and payload length.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidLength`] for payloads over eight bytes and
    /// [`BusError::InvalidIdentifier`] for identifiers beyond 29 bits.
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Result<Self, BusError> {
        let data = data.into();
        if data.len() > MAX_PAYLOAD {
            return Err(BusError::InvalidLength { len: data.len() });
        }
        if id > MAX_CAN_ID {
            return Err(BusError::InvalidIdentifier { id: u64::from(id) });
        }
        Ok(Self { id, data })
    }

    /// Builds a frame from parts the protocol code has already bounded.
    pub(crate) fn from_parts(id: u32, data: &[u8]) -> Self {
        let len = data.len().min(MAX_PAYLOAD);
        Self {
            id: id & MAX_CAN_ID,
            data: data.get(..len).unwrap_or_default().to_vec(),
        }
    }

    /// Frame identifier.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Frame payload.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the identifier needs the 29-bit format.
    #[must_use]
    pub fn is_extended(&self) -> bool {
        self.id > MAX_STANDARD_ID
    }

    /// Payload copied into a zero padded eight byte array.
    pub(crate) fn padded(&self) -> [u8; MAX_PAYLOAD] {
        let mut bytes = [0_u8; MAX_PAYLOAD];
        for (slot, byte) in bytes.iter_mut().zip(&self.data) {
            *slot = *byte;
        }
        bytes
    }
}

/// A frame together with the time it was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedFrame {
    /// The received frame.
    pub frame: CanFrame,
    /// Receive time.
    pub timestamp: SystemTime,
}

impl ObservedFrame {
    /// Stamps `frame` with the current time.
    #[must_use]
    pub fn now(frame: CanFrame) -> Self {
        Self {
            frame,
            timestamp: SystemTime::now(),
        }
    }
}

/// Seconds since the Unix epoch, as reported on the wire.
#[must_use]
pub fn epoch_seconds(timestamp: SystemTime) -> f64 {
    timestamp
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}
