//! Wire types exchanged between the gateway daemon and its clients.
//!
//! Every request and reply travels as one JSON document terminated by a
//! newline. A request names a command and carries a parameter mapping:
//!
//! ```json
//! {"cmd":"sdo_upload","parameters":{"node_id":3,"index":"0x1017"}}
//! ```
//!
//! The daemon answers with exactly one reply. Successful replies echo the
//! command in `reply_cmd`; failures use an `err:` prefixed `reply_cmd` and
//! describe the failure in `reply_parameters`:
//!
//! ```json
//! {"reply_cmd":"sdo_upload","reply_parameters":{"index":4119,"subindex":0,"value":2500}}
//! {"reply_cmd":"err: node_id must be in 1..=127","reply_parameters":{"command":"sdo_upload","error_kind":"invalid_address","message":"node_id must be in 1..=127"}}
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Prefix carried by `reply_cmd` on every error reply.
pub const ERROR_REPLY_PREFIX: &str = "err:";

/// `reply_cmd` used when a request names an unregistered command.
pub const UNKNOWN_COMMAND_REPLY: &str = "unknown_cmd";

/// Named request or reply values.
pub type Parameters = Map<String, Value>;

/// A single command sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Registered command name.
    pub cmd: String,
    /// Command parameters; absent and `null` both mean "no parameters".
    #[serde(
        default,
        deserialize_with = "nullable_parameters",
        skip_serializing_if = "Map::is_empty"
    )]
    pub parameters: Parameters,
}

impl CommandRequest {
    /// Builds a request without parameters.
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            parameters: Parameters::new(),
        }
    }

    /// Adds a parameter, replacing any previous value under `key`.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

fn nullable_parameters<'de, D>(deserializer: D) -> Result<Parameters, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Parameters>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Failure categories reported in error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A parameter was missing, of the wrong type or out of range.
    ParameterError,
    /// A node address outside `1..=127`.
    InvalidAddress,
    /// The node address is already registered.
    DuplicateNode,
    /// The node address has not been registered.
    UnknownNode,
    /// The requested network-management state is not recognised.
    InvalidState,
    /// The production slot is outside the supported range.
    InvalidSlot,
    /// The transfer mode is not recognised.
    UnknownMode,
    /// A raw frame payload exceeds eight bytes.
    InvalidLength,
    /// An expedited payload exceeds four bytes.
    SizeMismatch,
    /// The node did not answer in time.
    Timeout,
    /// The node refused the access.
    AccessError,
    /// The schema could not be resolved or parsed.
    SchemaError,
    /// Sending or receiving on the bus failed.
    BusIo,
    /// The bus connection could not be opened.
    ConnectionError,
    /// The command name is not registered.
    UnknownCommand,
    /// The request line was not a valid request document.
    MalformedRequest,
    /// The gateway has stopped accepting commands.
    GatewayStopped,
    /// An unexpected internal failure.
    Internal,
}

impl ErrorKind {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParameterError => "parameter_error",
            Self::InvalidAddress => "invalid_address",
            Self::DuplicateNode => "duplicate_node",
            Self::UnknownNode => "unknown_node",
            Self::InvalidState => "invalid_state",
            Self::InvalidSlot => "invalid_slot",
            Self::UnknownMode => "unknown_mode",
            Self::InvalidLength => "invalid_length",
            Self::SizeMismatch => "size_mismatch",
            Self::Timeout => "timeout",
            Self::AccessError => "access_error",
            Self::SchemaError => "schema_error",
            Self::BusIo => "bus_io",
            Self::ConnectionError => "connection_error",
            Self::UnknownCommand => "unknown_command",
            Self::MalformedRequest => "malformed_request",
            Self::GatewayStopped => "gateway_stopped",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// The single reply produced for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    /// Echoed command name, `err: <reason>` or [`UNKNOWN_COMMAND_REPLY`].
    pub reply_cmd: String,
    /// Success payload or error description.
    #[serde(default, deserialize_with = "nullable_parameters")]
    pub reply_parameters: Parameters,
}

impl CommandReply {
    /// Builds a success reply echoing `command`.
    #[must_use]
    pub fn success(command: &str, payload: Parameters) -> Self {
        Self {
            reply_cmd: command.to_owned(),
            reply_parameters: payload,
        }
    }

    /// Builds an error reply for `command`.
    #[must_use]
    pub fn failure(command: &str, kind: ErrorKind, message: &str) -> Self {
        Self {
            reply_cmd: format!("{ERROR_REPLY_PREFIX} {message}"),
            reply_parameters: error_parameters(command, kind, message),
        }
    }

    /// Builds the reply for an unregistered command name.
    #[must_use]
    pub fn unknown_command(command: &str) -> Self {
        let message = format!("unknown command '{command}'");
        Self {
            reply_cmd: UNKNOWN_COMMAND_REPLY.to_owned(),
            reply_parameters: error_parameters(command, ErrorKind::UnknownCommand, &message),
        }
    }

    /// Returns `true` for error and unknown-command replies.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.reply_cmd.starts_with(ERROR_REPLY_PREFIX) || self.reply_cmd == UNKNOWN_COMMAND_REPLY
    }

    /// The command this reply answers.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        if self.is_error() {
            self.reply_parameters.get("command").and_then(Value::as_str)
        } else {
            Some(self.reply_cmd.as_str())
        }
    }

    /// The failure category of an error reply.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if !self.is_error() {
            return None;
        }
        self.reply_parameters
            .get("error_kind")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Looks up a payload value.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.reply_parameters.get(key)
    }
}

fn error_parameters(command: &str, kind: ErrorKind, message: &str) -> Parameters {
    let mut parameters = Parameters::new();
    parameters.insert("command".to_owned(), Value::from(command));
    parameters.insert("error_kind".to_owned(), Value::from(kind.as_str()));
    parameters.insert("message".to_owned(), Value::from(message));
    parameters
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn request_without_parameters_deserialises() {
        let request: CommandRequest =
            serde_json::from_str(r#"{"cmd":"scanner"}"#).expect("parse request");
        assert_eq!(request, CommandRequest::new("scanner"));
    }

    #[test]
    fn request_with_null_parameters_deserialises() {
        let request: CommandRequest =
            serde_json::from_str(r#"{"cmd":"turn_off","parameters":null}"#).expect("parse");
        assert!(request.parameters.is_empty());
    }

    #[test]
    fn builder_serialises_parameters() {
        let request = CommandRequest::new("sdo_upload").with_parameter("node_id", 3);
        let encoded = serde_json::to_value(&request).expect("encode");
        assert_eq!(encoded, json!({"cmd": "sdo_upload", "parameters": {"node_id": 3}}));
    }

    #[test]
    fn failure_reply_carries_prefix_and_description() {
        let reply = CommandReply::failure("add_node", ErrorKind::InvalidAddress, "bad node");
        assert_eq!(reply.reply_cmd, "err: bad node");
        assert!(reply.is_error());
        assert_eq!(reply.command(), Some("add_node"));
        assert_eq!(reply.error_kind(), Some(ErrorKind::InvalidAddress));
    }

    #[test]
    fn unknown_command_reply_names_the_command() {
        let reply = CommandReply::unknown_command("reboot");
        assert_eq!(reply.reply_cmd, UNKNOWN_COMMAND_REPLY);
        assert_eq!(reply.command(), Some("reboot"));
        assert_eq!(reply.error_kind(), Some(ErrorKind::UnknownCommand));
    }

    #[rstest]
    #[case::timeout(ErrorKind::Timeout)]
    #[case::access(ErrorKind::AccessError)]
    #[case::stopped(ErrorKind::GatewayStopped)]
    fn error_kind_wire_name_matches_serde(#[case] kind: ErrorKind) {
        let encoded = serde_json::to_value(kind).expect("encode kind");
        assert_eq!(encoded, Value::from(kind.as_str()));
    }

    #[test]
    fn success_reply_echoes_command() {
        let reply = CommandReply::success("scanner", Parameters::new());
        assert!(!reply.is_error());
        assert_eq!(reply.command(), Some("scanner"));
        assert_eq!(reply.error_kind(), None);
    }
}
