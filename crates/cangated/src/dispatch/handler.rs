//! Connection handler that dispatches newline-delimited requests.

use std::sync::Arc;

use tracing::{debug, warn};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;
use super::gateway::DispatchOutcome;
use super::manager::GatewayManager;
use super::response::ResponseWriter;
use crate::process::{ShutdownReason, ShutdownTrigger};
use crate::transport::{ConnectionHandler, ConnectionStream, LineError, RequestLines};

/// Serves one client connection: any number of request lines, each answered
/// with exactly one reply, until the client hangs up or sends `turn_off`.
pub struct DispatchConnectionHandler {
    gateway: GatewayManager,
    shutdown: ShutdownTrigger,
}

impl DispatchConnectionHandler {
    pub fn new(gateway: GatewayManager, shutdown: ShutdownTrigger) -> Arc<Self> {
        Arc::new(Self { gateway, shutdown })
    }

    fn dispatch(&self, line: &[u8]) -> DispatchOutcome {
        self.gateway
            .with_gateway(|gateway| gateway.dispatch_line(line))
            .unwrap_or_else(|error| DispatchOutcome::failure("", &error))
    }
}

impl ConnectionHandler for DispatchConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        let mut lines = RequestLines::new(stream);
        loop {
            let line = match lines.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!(target: DISPATCH_TARGET, "client closed connection");
                    return;
                }
                Err(LineError::TooLarge { size, max_size }) => {
                    let error = DispatchError::RequestTooLarge { size, max_size };
                    warn!(target: DISPATCH_TARGET, %error, "request rejected");
                    let outcome = DispatchOutcome::failure("", &error);
                    let _ = ResponseWriter::new(lines.get_mut()).write_reply(&outcome.reply);
                    return;
                }
                Err(LineError::Io(error)) => {
                    warn!(target: DISPATCH_TARGET, %error, "failed to read request");
                    return;
                }
            };
            if line.trim_ascii().is_empty() {
                continue;
            }

            let outcome = self.dispatch(&line);
            if let Err(error) = ResponseWriter::new(lines.get_mut()).write_reply(&outcome.reply) {
                warn!(target: DISPATCH_TARGET, %error, "failed to write reply");
                return;
            }
            if outcome.shutdown_requested {
                self.shutdown.request(ShutdownReason::TurnOff);
                return;
            }
        }
    }
}
