//! Configuration loading for the CLI.
//!
//! Configuration flags must precede the command name; everything after it
//! is handed to the command parser.

use std::ffi::{OsStr, OsString};

use cangate_config::Config;
use ortho_config::OrthoConfig;

use crate::errors::AppError;

/// Flags understood by the shared configuration loader.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--daemon-socket",
    "--log-filter",
    "--log-format",
    "--bus-adapter",
    "--bus-channel",
    "--bus-bitrate",
    "--schema-dir",
    "--sdo-timeout-ms",
    "--scan-window-ms",
    "--simulated-nodes",
];

pub(crate) trait ConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

/// Arguments split between the configuration loader and the command parser.
#[derive(Debug)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_arguments: Vec<OsString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    let (flag, inline) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline,
        }
    } else {
        FlagAction::Stop
    }
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let mut iter = args.iter();
    let program: Vec<OsString> = iter.next().cloned().into_iter().collect();
    let mut config_arguments = program.clone();
    let mut rest = iter.as_slice();

    while let Some((argument, tail)) = rest.split_first() {
        match classify(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push(argument.clone());
                rest = tail;
                if needs_value && let Some((value, tail)) = rest.split_first() {
                    config_arguments.push(value.clone());
                    rest = tail;
                }
            }
            FlagAction::Stop => break,
        }
    }

    let mut command_arguments = program;
    command_arguments.extend(rest.iter().cloned());
    ConfigArgumentSplit {
        config_arguments,
        command_arguments,
    }
}
