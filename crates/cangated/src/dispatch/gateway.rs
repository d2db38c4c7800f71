//! The serialized request/handle/reply cycle.
//!
//! A [`Gateway`] owns the bus session and moves through
//! `Idle → Parsing → Validating → Executing → Replying → Idle` for every
//! request. Parse and validation failures skip straight to `Replying`;
//! a successful `turn_off` closes the session and parks the gateway in the
//! terminal `Stopped` phase.

use std::time::Instant;

use cangate_types::{CommandReply, CommandRequest};
use tracing::{debug, info, warn};

use super::DISPATCH_TARGET;
use super::command::{Command, CommandName};
use super::errors::DispatchError;
use super::handlers::{self, Context};
use super::request::parse_request;
use crate::bus::BusSession;
use crate::dictionary::SchemaLoader;
#[cfg(any(test, feature = "sim-network"))]
use crate::sim::SimulatedNetwork;

/// Where the gateway is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayPhase {
    Idle,
    Parsing,
    Validating,
    Executing,
    Replying,
    Stopped,
}

/// Reply to one request and whether it asked the daemon to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub reply: CommandReply,
    pub shutdown_requested: bool,
}

impl DispatchOutcome {
    fn reply(reply: CommandReply) -> Self {
        Self {
            reply,
            shutdown_requested: false,
        }
    }

    /// Error reply for a failure raised outside the gateway.
    pub fn failure(command: &str, error: &DispatchError) -> Self {
        Self::reply(CommandReply::failure(
            command,
            error.error_kind(),
            &error.to_string(),
        ))
    }
}

/// Owns the bus session and runs commands one at a time.
pub struct Gateway {
    session: Box<dyn BusSession>,
    schemas: Box<dyn SchemaLoader>,
    phase: GatewayPhase,
    #[cfg(any(test, feature = "sim-network"))]
    simulation: Option<SimulatedNetwork>,
}

impl Gateway {
    pub fn new(session: Box<dyn BusSession>, schemas: Box<dyn SchemaLoader>) -> Self {
        Self {
            session,
            schemas,
            phase: GatewayPhase::Idle,
            #[cfg(any(test, feature = "sim-network"))]
            simulation: None,
        }
    }

    /// Attaches simulated peers; they are stopped when the gateway closes.
    #[cfg(any(test, feature = "sim-network"))]
    #[must_use]
    pub fn with_simulation(mut self, simulation: SimulatedNetwork) -> Self {
        self.simulation = Some(simulation);
        self
    }

    pub fn phase(&self) -> GatewayPhase {
        self.phase
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == GatewayPhase::Stopped
    }

    /// Frame filters still registered on the session.
    pub fn active_filter_count(&self) -> usize {
        self.session.active_filter_count()
    }

    /// Parses and runs one request line.
    pub fn dispatch_line(&mut self, line: &[u8]) -> DispatchOutcome {
        if self.is_stopped() {
            return stopped_outcome(&salvage(line));
        }
        self.phase = GatewayPhase::Parsing;
        match parse_request(line) {
            Ok(request) => self.dispatch(&request),
            Err(rejected) => {
                warn!(
                    target: DISPATCH_TARGET,
                    error = %rejected.error,
                    "malformed request"
                );
                self.finish(DispatchOutcome::failure(&rejected.command, &rejected.error))
            }
        }
    }

    /// Validates and runs one request.
    pub fn dispatch(&mut self, request: &CommandRequest) -> DispatchOutcome {
        if self.is_stopped() {
            return stopped_outcome(&request.cmd);
        }
        self.phase = GatewayPhase::Validating;
        let Some(name) = CommandName::parse(&request.cmd) else {
            warn!(target: DISPATCH_TARGET, command = %request.cmd, "unknown command");
            return self.finish(DispatchOutcome::reply(CommandReply::unknown_command(
                &request.cmd,
            )));
        };
        let command = match Command::from_request(name, &request.parameters) {
            Ok(command) => command,
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    command = name.as_str(),
                    %error,
                    "invalid parameters"
                );
                return self.finish(DispatchOutcome::failure(&request.cmd, &error));
            }
        };

        self.phase = GatewayPhase::Executing;
        let started = Instant::now();
        let result = self.execute(&command);
        let elapsed_ms = started.elapsed().as_millis();

        let outcome = match result {
            Ok(payload) => {
                debug!(
                    target: DISPATCH_TARGET,
                    command = name.as_str(),
                    elapsed_ms,
                    "command completed"
                );
                DispatchOutcome {
                    reply: CommandReply::success(&request.cmd, payload),
                    shutdown_requested: matches!(command, Command::TurnOff),
                }
            }
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    command = name.as_str(),
                    error_kind = error.error_kind().as_str(),
                    %error,
                    elapsed_ms,
                    "command failed"
                );
                DispatchOutcome::failure(&request.cmd, &error)
            }
        };
        self.finish(outcome)
    }

    /// Stops the timing source, drops lingering filters, disconnects the bus
    /// and stops simulated peers. Safe to call more than once.
    pub fn close(&mut self) {
        if self.is_stopped() {
            return;
        }
        if let Err(error) = self.session.stop_timing_source() {
            debug!(target: DISPATCH_TARGET, %error, "timing source already unavailable");
        }
        self.session.close();
        #[cfg(any(test, feature = "sim-network"))]
        if let Some(simulation) = self.simulation.as_mut() {
            simulation.stop();
        }
        self.phase = GatewayPhase::Stopped;
        info!(
            target: DISPATCH_TARGET,
            lingering_filters = self.session.active_filter_count(),
            "gateway closed"
        );
    }

    fn execute(&mut self, command: &Command) -> Result<cangate_types::Parameters, DispatchError> {
        let mut context = Context {
            session: self.session.as_mut(),
            schemas: self.schemas.as_ref(),
            #[cfg(any(test, feature = "sim-network"))]
            simulation: self.simulation.as_ref(),
        };
        match command {
            Command::AddNode { node, schema } => handlers::add_node(&mut context, *node, schema),
            Command::Scanner => handlers::scanner(&mut context),
            Command::NmtChangeState { node, state } => {
                handlers::nmt_change_state(&mut context, *node, *state)
            }
            Command::PdoConfigTx(request) => handlers::pdo_config_tx(&mut context, request),
            Command::SdoUpload { object, mode } => handlers::sdo_upload(&mut context, *object, *mode),
            Command::SdoDownload { object, mode, data } => {
                handlers::sdo_download(&mut context, *object, *mode, data)
            }
            Command::EmcysRead { node, kind } => handlers::emcys_read(&mut context, *node, *kind),
            Command::SubscribeNextMsg { can_id, timeout } => {
                handlers::subscribe_next_msg(&mut context, *can_id, *timeout)
            }
            Command::SyncActivatePeriodic { period } => {
                handlers::sync_activate_periodic(&mut context, *period)
            }
            Command::SyncDeactivatePeriodic => handlers::sync_deactivate_periodic(&mut context),
            Command::CanSendMsg { frame } => handlers::can_send_msg(&mut context, frame),
            Command::TurnOff => handlers::turn_off(),
            #[cfg(any(test, feature = "sim-network"))]
            Command::EmcysTriggerSim {
                node,
                code,
                register,
                data,
            } => handlers::emcys_trigger_sim(&mut context, *node, *code, *register, data),
            #[cfg(any(test, feature = "sim-network"))]
            Command::EmcysResetSim {
                node,
                register,
                data,
            } => handlers::emcys_reset_sim(&mut context, *node, *register, data),
        }
    }

    fn finish(&mut self, outcome: DispatchOutcome) -> DispatchOutcome {
        self.phase = GatewayPhase::Replying;
        if outcome.shutdown_requested {
            self.close();
        } else {
            self.phase = GatewayPhase::Idle;
        }
        outcome
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.close();
    }
}

fn stopped_outcome(command: &str) -> DispatchOutcome {
    DispatchOutcome::failure(command, &DispatchError::Stopped)
}

fn salvage(line: &[u8]) -> String {
    parse_request(line).map_or_else(|rejected| rejected.command, |request| request.cmd)
}
