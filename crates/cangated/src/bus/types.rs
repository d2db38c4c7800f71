//! Value types shared by bus operations.

use std::fmt;
use std::time::SystemTime;

use super::BusError;

/// A CANopen node address in `1..=127`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u8);

impl NodeId {
    /// Lowest valid address.
    pub const MIN: u8 = 1;
    /// Highest valid address.
    pub const MAX: u8 = 127;

    /// Validates a raw address.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidAddress`] outside `1..=127`.
    pub fn new(raw: i64) -> Result<Self, BusError> {
        u8::try_from(raw)
            .ok()
            .filter(|value| (Self::MIN..=Self::MAX).contains(value))
            .map(Self)
            .ok_or(BusError::InvalidAddress { value: raw })
    }

    /// Raw address.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Iterates over every valid address.
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MIN..=Self::MAX).map(Self)
    }

    /// Extracts the node address from a node-addressed frame identifier.
    pub(crate) fn from_cob_id(id: u32) -> Option<Self> {
        u8::try_from(id & 0x7F)
            .ok()
            .filter(|value| *value >= Self::MIN)
            .map(Self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// An entry in a node's object dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectAddress {
    /// Owning node.
    pub node: NodeId,
    /// Object index.
    pub index: u16,
    /// Object subindex.
    pub subindex: u8,
}

impl ObjectAddress {
    /// Builds an address.
    #[must_use]
    pub const fn new(node: NodeId, index: u16, subindex: u8) -> Self {
        Self {
            node,
            index,
            subindex,
        }
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{:#06x}:{}", self.node, self.index, self.subindex)
    }
}

/// Object transfer protocol variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransferMode {
    /// Up to four bytes in the initiating exchange.
    #[default]
    Expedited,
    /// Seven-byte segments, one exchange each.
    Segmented,
    /// Blocks of segments acknowledged together, CRC protected.
    Block,
}

impl TransferMode {
    /// Parses a mode name.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownMode`] for unrecognised names.
    pub fn parse(raw: &str) -> Result<Self, BusError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "expedited" => Ok(Self::Expedited),
            "segmented" => Ok(Self::Segmented),
            "block" => Ok(Self::Block),
            _ => Err(BusError::UnknownMode {
                mode: raw.to_owned(),
            }),
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Expedited => "expedited",
            Self::Segmented => "segmented",
            Self::Block => "block",
        }
    }
}

/// Network-management state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmtState {
    /// Resetting; the node announces itself with a boot-up message.
    Initialising,
    /// Configuration allowed, process data disabled.
    PreOperational,
    /// Fully operational.
    Operational,
    /// Only network management is serviced.
    Stopped,
}

impl NmtState {
    /// Parses a state name such as `PRE-OPERATIONAL`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidState`] for unrecognised names.
    pub fn parse(raw: &str) -> Result<Self, BusError> {
        match raw.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "INITIALISING" | "INITIALIZING" => Ok(Self::Initialising),
            "PRE-OPERATIONAL" => Ok(Self::PreOperational),
            "OPERATIONAL" => Ok(Self::Operational),
            "STOPPED" => Ok(Self::Stopped),
            _ => Err(BusError::InvalidState {
                state: raw.to_owned(),
            }),
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialising => "INITIALISING",
            Self::PreOperational => "PRE-OPERATIONAL",
            Self::Operational => "OPERATIONAL",
            Self::Stopped => "STOPPED",
        }
    }

    /// Command specifier that drives a node into this state.
    #[must_use]
    pub const fn command_specifier(self) -> u8 {
        match self {
            Self::Initialising => 0x81,
            Self::PreOperational => 0x80,
            Self::Operational => 0x01,
            Self::Stopped => 0x02,
        }
    }

    /// Decodes a command specifier. Communication reset maps to
    /// [`Self::Initialising`].
    #[must_use]
    pub const fn from_command_specifier(specifier: u8) -> Option<Self> {
        match specifier {
            0x81 | 0x82 => Some(Self::Initialising),
            0x80 => Some(Self::PreOperational),
            0x01 => Some(Self::Operational),
            0x02 => Some(Self::Stopped),
            _ => None,
        }
    }

    /// State byte carried by heartbeat and boot-up messages.
    #[must_use]
    pub const fn heartbeat_code(self) -> u8 {
        match self {
            Self::Initialising => 0x00,
            Self::Stopped => 0x04,
            Self::Operational => 0x05,
            Self::PreOperational => 0x7F,
        }
    }
}

impl fmt::Display for NmtState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Which emergency record set to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStateKind {
    /// Currently active errors.
    Active,
    /// Every error received, oldest first.
    Log,
}

/// One emergency message received from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRecord {
    /// Emergency error code.
    pub code: u16,
    /// Error register snapshot.
    pub register: u8,
    /// Manufacturer specific bytes.
    pub data: Vec<u8>,
    /// Receive time.
    pub timestamp: SystemTime,
}

/// A transmit process-data slot in `1..=512`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdoSlot(u16);

impl PdoSlot {
    /// Validates a slot number.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidSlot`] outside `1..=512`.
    pub fn new(raw: i64) -> Result<Self, BusError> {
        u16::try_from(raw)
            .ok()
            .filter(|value| (1..=512).contains(value))
            .map(Self)
            .ok_or(BusError::InvalidSlot { value: raw })
    }

    /// Slot number.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Index of the communication parameter record.
    #[must_use]
    pub const fn communication_index(self) -> u16 {
        0x1800 + (self.0 - 1)
    }

    /// Index of the mapping parameter record.
    #[must_use]
    pub const fn mapping_index(self) -> u16 {
        0x1A00 + (self.0 - 1)
    }
}

/// One object mapped into a process-data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedObject {
    /// Object index.
    pub index: u16,
    /// Object subindex.
    pub subindex: u8,
    /// Mapped width in bits.
    pub bit_length: u8,
}

impl MappedObject {
    /// Mapping entry as stored in the mapping record.
    #[must_use]
    pub const fn encode(self) -> u32 {
        let [index_high, index_low] = self.index.to_be_bytes();
        u32::from_be_bytes([index_high, index_low, self.subindex, self.bit_length])
    }

    /// Decodes a mapping entry.
    #[must_use]
    pub const fn decode(raw: u32) -> Self {
        let [index_high, index_low, subindex, bit_length] = raw.to_be_bytes();
        Self {
            index: u16::from_be_bytes([index_high, index_low]),
            subindex,
            bit_length,
        }
    }
}

/// Requested configuration of one transmit process-data slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpdoConfig {
    /// Target node.
    pub node: NodeId,
    /// Slot to configure.
    pub slot: PdoSlot,
    /// Transmission type; 1..=240 means every n-th timing pulse.
    pub transmission_type: u8,
    /// Event timer in milliseconds, zero disables it.
    pub event_timer_ms: u16,
    /// Whether the slot produces after configuration.
    pub enabled: bool,
    /// Replacement mapping; `None` keeps the node's mapping.
    pub mapping: Option<Vec<MappedObject>>,
}
