//! Behavioural suites for the gateway daemon.

mod bootstrap_behaviour;
mod command_behaviour;
mod support;
