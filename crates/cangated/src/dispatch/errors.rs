//! Error types for request dispatch failures.
//!
//! Every failure raised while parsing, validating or executing a command is
//! a [`DispatchError`]. The gateway never lets one escape: each is mapped to
//! an [`ErrorKind`] and returned to the caller as an error reply.

use std::io;

use cangate_types::ErrorKind;
use thiserror::Error;

use crate::bus::BusError;
use crate::dictionary::SchemaError;
#[cfg(any(test, feature = "sim-network"))]
use crate::sim::SimulationError;

/// Errors surfaced during request parsing and dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request line is not a valid request document.
    #[error("malformed request: {message}")]
    MalformedRequest {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Request exceeds the maximum allowed size.
    #[error("request too large: {size} bytes exceeds {max_size} byte limit")]
    RequestTooLarge { size: usize, max_size: usize },

    /// A parameter is missing, mistyped or out of range.
    #[error("{message}")]
    Parameter { message: String },

    /// The bus session rejected or failed the operation.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// A schema reference could not be loaded.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The simulated network rejected the request.
    #[cfg(any(test, feature = "sim-network"))]
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    /// The gateway has processed `turn_off`.
    #[error("the gateway has stopped")]
    Stopped,

    /// IO error during read or write.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Reply serialization failed.
    #[error("failed to serialize reply: {0}")]
    SerializeReply(#[from] serde_json::Error),

    /// Internal error (e.g., lock poisoned).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DispatchError {
    /// Failure category reported to the caller.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::MalformedRequest { .. } | Self::RequestTooLarge { .. } => {
                ErrorKind::MalformedRequest
            }
            Self::Parameter { .. } => ErrorKind::ParameterError,
            Self::Bus(error) => bus_error_kind(error),
            Self::Schema(_) => ErrorKind::SchemaError,
            #[cfg(any(test, feature = "sim-network"))]
            Self::Simulation(error) => match error {
                SimulationError::UnknownNode { .. } => ErrorKind::UnknownNode,
                SimulationError::Bus(error) => bus_error_kind(error),
                SimulationError::Schema(_) => ErrorKind::SchemaError,
                SimulationError::Spawn { .. } => ErrorKind::Internal,
            },
            Self::Stopped => ErrorKind::GatewayStopped,
            Self::Io(_) | Self::SerializeReply(_) | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Creates a malformed request error from a serde error.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::MalformedRequest {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a malformed request error with a custom message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a parameter error.
    pub fn parameter(message: impl Into<String>) -> Self {
        Self::Parameter {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

fn bus_error_kind(error: &BusError) -> ErrorKind {
    match error {
        BusError::Connection { .. } | BusError::AdapterUnavailable { .. } => {
            ErrorKind::ConnectionError
        }
        BusError::InvalidAddress { .. } => ErrorKind::InvalidAddress,
        BusError::DuplicateNode { .. } => ErrorKind::DuplicateNode,
        BusError::UnknownNode { .. } => ErrorKind::UnknownNode,
        BusError::InvalidState { .. } => ErrorKind::InvalidState,
        BusError::InvalidSlot { .. } => ErrorKind::InvalidSlot,
        BusError::UnknownMode { .. } => ErrorKind::UnknownMode,
        BusError::InvalidLength { .. } => ErrorKind::InvalidLength,
        BusError::InvalidIdentifier { .. } | BusError::Value(_) => ErrorKind::ParameterError,
        BusError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
        BusError::Timeout { .. } => ErrorKind::Timeout,
        BusError::Access { .. } | BusError::Protocol { .. } => ErrorKind::AccessError,
        BusError::Schema(_) => ErrorKind::SchemaError,
        BusError::Io(_) | BusError::Closed => ErrorKind::BusIo,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::bus::NodeId;

    fn node() -> NodeId {
        NodeId::new(5).expect("valid node")
    }

    #[rstest]
    #[case::address(BusError::InvalidAddress { value: 0 }, ErrorKind::InvalidAddress)]
    #[case::duplicate(BusError::DuplicateNode { node: node() }, ErrorKind::DuplicateNode)]
    #[case::timeout(
        BusError::Timeout { operation: "upload", node: node(), timeout: Duration::from_secs(2) },
        ErrorKind::Timeout
    )]
    #[case::abort(
        BusError::Access { node: node(), index: 0x1000, subindex: 0, code: 0x0601_0002, reason: "read only" },
        ErrorKind::AccessError
    )]
    #[case::identifier(BusError::InvalidIdentifier { id: 0x4000_0000 }, ErrorKind::ParameterError)]
    #[case::closed(BusError::Closed, ErrorKind::BusIo)]
    fn maps_bus_errors(#[case] error: BusError, #[case] expected: ErrorKind) {
        assert_eq!(DispatchError::Bus(error).error_kind(), expected);
    }

    #[rstest]
    fn request_errors_are_malformed() {
        let oversized = DispatchError::RequestTooLarge {
            size: 70_000,
            max_size: 65_536,
        };
        assert_eq!(oversized.error_kind(), ErrorKind::MalformedRequest);
        assert_eq!(
            DispatchError::malformed("empty request").error_kind(),
            ErrorKind::MalformedRequest
        );
    }

    #[rstest]
    fn parameter_message_is_verbatim() {
        let error = DispatchError::parameter("missing parameter 'node_id'");
        assert_eq!(error.to_string(), "missing parameter 'node_id'");
    }
}
