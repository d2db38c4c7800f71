//! Command dispatch for the gateway.
//!
//! Requests arrive as newline-delimited JSON documents naming a command and
//! its parameters. The dispatcher parses each line, resolves the name to a
//! closed [`CommandName`], validates the parameters into a typed
//! [`Command`] and runs the matching handler against the bus session. Every
//! request gets exactly one reply; failures become `err:` replies carrying
//! `{command, error_kind, message}` and never stop the loop.
//!
//! Access to the gateway is serialized by [`GatewayManager`], so only one
//! command is in flight at any time, whichever connection sent it.

mod command;
mod errors;
mod gateway;
mod handler;
mod handlers;
mod manager;
mod params;
mod request;
mod response;

pub use self::command::{Command, CommandName, MappingRequest, PdoRequest};
pub use self::errors::DispatchError;
pub use self::gateway::{DispatchOutcome, Gateway, GatewayPhase};
pub use self::handler::DispatchConnectionHandler;
pub use self::manager::GatewayManager;
pub use self::response::ResponseWriter;

pub(crate) use self::handlers::NOTHING_OBSERVED;

/// Tracing target for dispatch activity.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

#[cfg(test)]
mod gateway_tests;
