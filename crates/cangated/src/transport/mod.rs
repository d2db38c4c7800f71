//! Socket transport for gateway clients.
//!
//! The listener binds the configured TCP or Unix endpoint and hands every
//! accepted connection to a [`ConnectionHandler`] on its own thread. A
//! connection carries newline-delimited requests read with
//! [`RequestLines`].

mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod listener_tests;
#[cfg(test)]
mod test_utils;

pub(crate) use self::errors::ListenerError;
pub(crate) use self::handler::{ConnectionHandler, ConnectionStream, LineError, RequestLines};
pub(crate) use self::listener::{ListenerHandle, SocketListener};
#[cfg(test)]
pub(crate) use self::test_utils::CountingHandler;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
