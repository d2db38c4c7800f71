//! Command-line client for the CANopen gateway.
//!
//! `cangate <command> [key=value ...]` sends one request line to the
//! configured gateway socket, waits for the single reply and prints it.
//! Configuration flags such as `--daemon-socket` must precede the command.
//! The process exits with status 1 when the gateway answers with an error
//! reply and with status 2 when the request could not be delivered.

use std::ffi::OsString;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use cangate_types::CommandReply;
use clap::Parser;
use clap::error::ErrorKind as ClapErrorKind;
use serde_json::Value;

mod cli;
mod command;
mod config;
mod errors;
mod transport;

pub use cli::OutputFormat;
use cli::{Cli, ResolvedOutputFormat};
use command::CommandInvocation;
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
use errors::AppError;
use transport::connect;

const EXIT_ERROR_REPLY: u8 = 1;
const EXIT_LOCAL_FAILURE: u8 = 2;

/// Runs the CLI with the given arguments and output streams.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E, stdout_is_terminal: bool) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, stdout_is_terminal, &OrthoConfigLoader)
}

pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    stdout_is_terminal: bool,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);

    let cli = match Cli::try_parse_from(&split.command_arguments) {
        Ok(cli) => cli,
        Err(error)
            if matches!(
                error.kind(),
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion
            ) =>
        {
            let printed = write!(stdout, "{error}").map_err(AppError::PrintReply);
            return report(printed, stderr, ExitCode::SUCCESS);
        }
        Err(error) => return fail(stderr, &AppError::CliUsage(error)),
    };

    let outcome = loader.load(&split.config_arguments).and_then(|config| {
        let invocation = CommandInvocation::try_from(&cli)?;
        exchange(&invocation, config.daemon_socket())
    });
    match outcome {
        Ok((line, reply)) => {
            let format = cli.output.resolve(stdout_is_terminal);
            let code = if reply.is_error() {
                ExitCode::from(EXIT_ERROR_REPLY)
            } else {
                ExitCode::SUCCESS
            };
            report(print_reply(stdout, format, &line, &reply), stderr, code)
        }
        Err(error) => fail(stderr, &error),
    }
}

fn exchange(
    invocation: &CommandInvocation,
    endpoint: &cangate_config::SocketEndpoint,
) -> Result<(String, CommandReply), AppError> {
    let mut connection = connect(endpoint)?;
    invocation.write_line(&mut connection)?;
    let mut reader = io::BufReader::new(connection);
    let mut line = String::new();
    if reader.read_line(&mut line).map_err(AppError::ReadReply)? == 0 {
        return Err(AppError::MissingReply);
    }
    let reply = serde_json::from_str(&line).map_err(AppError::ParseReply)?;
    Ok((line.trim_end().to_owned(), reply))
}

fn print_reply<W>(
    stdout: &mut W,
    format: ResolvedOutputFormat,
    line: &str,
    reply: &CommandReply,
) -> Result<(), AppError>
where
    W: Write,
{
    match format {
        ResolvedOutputFormat::Json => writeln!(stdout, "{line}"),
        ResolvedOutputFormat::Human => write!(stdout, "{}", render_human(reply)),
    }
    .and_then(|()| stdout.flush())
    .map_err(AppError::PrintReply)
}

fn render_human(reply: &CommandReply) -> String {
    let mut text = format!("{}\n", reply.reply_cmd);
    for (key, value) in &reply.reply_parameters {
        let rendered = match value {
            Value::String(inner) => inner.clone(),
            other => other.to_string(),
        };
        text.push_str(&format!("  {key}: {rendered}\n"));
    }
    text
}

fn report<E: Write>(result: Result<(), AppError>, stderr: &mut E, code: ExitCode) -> ExitCode {
    match result {
        Ok(()) => code,
        Err(error) => fail(stderr, &error),
    }
}

fn fail<E: Write>(stderr: &mut E, error: &AppError) -> ExitCode {
    let _ = writeln!(stderr, "cangate: {error}");
    ExitCode::from(EXIT_LOCAL_FAILURE)
}
