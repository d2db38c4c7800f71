//! Errors raised by the bus layer.

use std::io;
use std::time::Duration;

use cangate_config::BusAdapter;
use thiserror::Error;

use super::NodeId;
use crate::dictionary::{SchemaError, ValueError};

/// Failures reported by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The adapter could not be opened.
    #[error("failed to open {adapter} adapter on channel '{channel}': {source}")]
    Connection {
        /// Adapter kind.
        adapter: BusAdapter,
        /// Requested channel.
        channel: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The adapter was not compiled into this build.
    #[error("the {adapter} adapter is not available in this build")]
    AdapterUnavailable {
        /// Adapter kind.
        adapter: BusAdapter,
    },
    /// A node address outside `1..=127`.
    #[error("node_id {value} must be in 1..=127")]
    InvalidAddress {
        /// Rejected address.
        value: i64,
    },
    /// The node was already added.
    #[error("node {node} is already added")]
    DuplicateNode {
        /// Repeated node.
        node: NodeId,
    },
    /// The node has not been added.
    #[error("node {node} has not been added")]
    UnknownNode {
        /// Missing node.
        node: NodeId,
    },
    /// An unrecognised network-management state name.
    #[error("unknown network state '{state}'")]
    InvalidState {
        /// Rejected state name.
        state: String,
    },
    /// A production slot outside `1..=512`.
    #[error("pdo_number {value} must be in 1..=512")]
    InvalidSlot {
        /// Rejected slot.
        value: i64,
    },
    /// An unrecognised transfer mode.
    #[error("unknown transfer mode '{mode}'")]
    UnknownMode {
        /// Rejected mode name.
        mode: String,
    },
    /// A raw payload longer than eight bytes.
    #[error("frame payload of {len} bytes exceeds 8 bytes")]
    InvalidLength {
        /// Payload length.
        len: usize,
    },
    /// A frame identifier that does not fit 29 bits.
    #[error("frame identifier {id:#x} exceeds 29 bits")]
    InvalidIdentifier {
        /// Rejected identifier.
        id: u64,
    },
    /// An expedited transfer asked to carry more than four bytes.
    #[error("expedited transfer cannot carry {len} bytes")]
    SizeMismatch {
        /// Payload length.
        len: usize,
    },
    /// The node did not answer in time.
    #[error("{operation} on node {node} timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Target node.
        node: NodeId,
        /// Exceeded timeout.
        timeout: Duration,
    },
    /// The node aborted the transfer.
    #[error("node {node} aborted access to {index:#06x}:{subindex}: {reason} ({code:#010x})")]
    Access {
        /// Target node.
        node: NodeId,
        /// Object index.
        index: u16,
        /// Object subindex.
        subindex: u8,
        /// Abort code.
        code: u32,
        /// Abort code description.
        reason: &'static str,
    },
    /// The node answered with an unexpected frame.
    #[error("unexpected response from node {node}: {message}")]
    Protocol {
        /// Target node.
        node: NodeId,
        /// Description of the mismatch.
        message: String,
    },
    /// A value could not be converted for transfer.
    #[error(transparent)]
    Value(#[from] ValueError),
    /// The schema could not be resolved or parsed.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Sending or receiving a frame failed.
    #[error("bus I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The session has been closed.
    #[error("the bus session is closed")]
    Closed,
}
