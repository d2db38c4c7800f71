//! Command-line argument definitions.

use clap::{Parser, ValueEnum};

/// How replies are printed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// `human` on a terminal, `json` otherwise.
    #[default]
    Auto,
    /// One `key: value` line per reply parameter.
    Human,
    /// The reply line exactly as the gateway sent it.
    Json,
}

impl OutputFormat {
    pub(crate) const fn resolve(self, stdout_is_terminal: bool) -> ResolvedOutputFormat {
        match self {
            Self::Auto if stdout_is_terminal => ResolvedOutputFormat::Human,
            Self::Auto | Self::Json => ResolvedOutputFormat::Json,
            Self::Human => ResolvedOutputFormat::Human,
        }
    }
}

/// Output format after terminal detection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ResolvedOutputFormat {
    Human,
    Json,
}

/// Sends one command to the CANopen gateway and prints its reply.
#[derive(Parser, Debug)]
#[command(name = "cangate")]
pub(crate) struct Cli {
    /// Controls how the reply is rendered.
    #[arg(long, value_enum, default_value_t = OutputFormat::Auto)]
    pub(crate) output: OutputFormat,
    /// Command name, for example `sdo_upload`.
    #[arg(value_name = "COMMAND")]
    pub(crate) command: String,
    /// Parameters as `key=value`; values are parsed as JSON and fall back to
    /// plain strings.
    #[arg(value_name = "KEY=VALUE", num_args = 0.., allow_hyphen_values = true)]
    pub(crate) parameters: Vec<String>,
}
