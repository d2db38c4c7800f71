//! Request line parsing.

use cangate_types::CommandRequest;
use serde_json::Value;

use super::errors::DispatchError;

/// A request line that failed to parse, with whatever command name could be
/// recovered from it so the error reply can still name its command.
#[derive(Debug)]
pub(crate) struct RejectedRequest {
    pub(crate) command: String,
    pub(crate) error: DispatchError,
}

/// Parses one request line.
pub(crate) fn parse_request(line: &[u8]) -> Result<CommandRequest, RejectedRequest> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Err(RejectedRequest {
            command: String::new(),
            error: DispatchError::malformed("empty request"),
        });
    }
    let document: Value = serde_json::from_slice(trimmed).map_err(|source| RejectedRequest {
        command: String::new(),
        error: DispatchError::from_json_error(source),
    })?;
    let command = salvage_command(&document);
    let request: CommandRequest =
        serde_json::from_value(document).map_err(|source| RejectedRequest {
            command: command.clone(),
            error: DispatchError::from_json_error(source),
        })?;
    if request.cmd.trim().is_empty() {
        return Err(RejectedRequest {
            command,
            error: DispatchError::malformed("cmd must not be empty"),
        });
    }
    Ok(request)
}

fn salvage_command(document: &Value) -> String {
    document
        .get("cmd")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}
