//! Turns parsed arguments into the request line sent to the gateway.

use std::io::Write;

use cangate_types::{CommandRequest, Parameters};
use serde_json::Value;

use crate::cli::Cli;
use crate::errors::AppError;

/// A command with its parameters, validated locally before sending.
#[derive(Debug)]
pub(crate) struct CommandInvocation {
    pub(crate) request: CommandRequest,
}

impl TryFrom<&Cli> for CommandInvocation {
    type Error = AppError;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        let command = cli.command.trim();
        if command.is_empty() {
            return Err(AppError::MissingCommand);
        }
        let mut request = CommandRequest::new(command);
        request.parameters = parse_parameters(&cli.parameters)?;
        Ok(Self { request })
    }
}

impl CommandInvocation {
    pub(crate) fn write_line<W>(&self, writer: &mut W) -> Result<(), AppError>
    where
        W: Write,
    {
        serde_json::to_writer(&mut *writer, &self.request).map_err(AppError::SerialiseRequest)?;
        writer.write_all(b"\n").map_err(AppError::SendRequest)?;
        writer.flush().map_err(AppError::SendRequest)
    }
}

fn parse_parameters(arguments: &[String]) -> Result<Parameters, AppError> {
    let mut parameters = Parameters::new();
    for argument in arguments {
        let Some((key, raw)) = argument.split_once('=') else {
            return Err(AppError::MalformedParameter(argument.clone()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::MalformedParameter(argument.clone()));
        }
        parameters.insert(key.to_owned(), parse_value(raw));
    }
    Ok(parameters)
}

// `0x1017` is not JSON; hex integers are accepted as a convenience.
fn parse_value(raw: &str) -> Value {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))
        && let Ok(number) = u64::from_str_radix(hex, 16)
    {
        return Value::from(number);
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}
