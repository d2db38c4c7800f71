//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("the command name must not be empty")]
    MissingCommand,
    #[error("parameter '{0}' is not of the form key=value")]
    MalformedParameter(String),
    #[error("failed to resolve gateway address {endpoint}: {source}")]
    Resolve { endpoint: String, source: io::Error },
    #[error("failed to connect to gateway at {endpoint}: {source}")]
    Connect { endpoint: String, source: io::Error },
    #[cfg(not(unix))]
    #[error("platform does not support Unix sockets: {0}")]
    UnsupportedUnixTransport(String),
    #[error("failed to serialise command request: {0}")]
    SerialiseRequest(serde_json::Error),
    #[error("failed to send request to gateway: {0}")]
    SendRequest(io::Error),
    #[error("failed to read reply from gateway: {0}")]
    ReadReply(io::Error),
    #[error("gateway closed the connection without replying")]
    MissingReply,
    #[error("failed to parse gateway reply: {0}")]
    ParseReply(serde_json::Error),
    #[error("failed to print reply: {0}")]
    PrintReply(io::Error),
}
