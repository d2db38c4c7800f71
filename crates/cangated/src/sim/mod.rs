//! Simulated CANopen peers for development and tests.
//!
//! Each simulated node opens its own interface on the gateway's bus and runs
//! on a dedicated thread: it answers object transfers, follows network
//! management commands, produces heartbeats and process data, and emits
//! emergencies on request.

mod node;
mod sdo_server;

use cangate_config::{BusSettings, SimulatedNodes};
use thiserror::Error;
use tracing::info;

use self::node::{Control, NodeHandle};
use crate::bus::{BusError, NodeId, open_interface};
use crate::dictionary::{ObjectDictionary, SchemaError, SchemaLoader};

pub(crate) const SIM_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::sim");

const BUILTIN_SCHEMA: &str = include_str!("../../resources/sim_node.eds");

/// Parses the built-in simulated device schema.
///
/// # Errors
///
/// Returns [`SchemaError`] if the bundled schema is malformed.
pub fn builtin_dictionary() -> Result<ObjectDictionary, SchemaError> {
    ObjectDictionary::from_eds("built-in SimNode", BUILTIN_SCHEMA)
}

/// Failures starting or driving the simulated network.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// No simulated node has the address.
    #[error("no simulated node at address {node}")]
    UnknownNode {
        /// Requested address.
        node: NodeId,
    },
    /// A node's interface could not be opened or the address is invalid.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// A node's schema could not be loaded.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A node thread could not be started.
    #[error("failed to start simulated node {node}: {source}")]
    Spawn {
        /// Node address.
        node: NodeId,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Running simulated nodes.
pub struct SimulatedNetwork {
    nodes: Vec<NodeHandle>,
}

impl SimulatedNetwork {
    /// Starts one node per declaration on the bus described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError`] when an address is invalid, a schema
    /// cannot be loaded or a node cannot attach to the bus. Nodes started
    /// before the failure are stopped.
    pub fn start(
        settings: &BusSettings,
        declared: &SimulatedNodes,
        schemas: &dyn SchemaLoader,
    ) -> Result<Self, SimulationError> {
        let mut network = Self { nodes: Vec::new() };
        for declaration in declared.iter() {
            let node = NodeId::new(i64::from(declaration.node_id))?;
            let dictionary = match &declaration.schema {
                Some(reference) => schemas.load(reference)?,
                None => builtin_dictionary()?,
            };
            network.attach(settings, node, dictionary)?;
        }
        Ok(network)
    }

    /// Starts one more node on the bus described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError`] when the address is taken, the interface
    /// cannot be opened or the thread cannot start.
    pub fn attach(
        &mut self,
        settings: &BusSettings,
        node: NodeId,
        dictionary: ObjectDictionary,
    ) -> Result<(), SimulationError> {
        if self.handle(node).is_some() {
            return Err(BusError::DuplicateNode { node }.into());
        }
        let interface = open_interface(settings)?;
        let handle = NodeHandle::spawn(node, dictionary, interface)
            .map_err(|source| SimulationError::Spawn { node, source })?;
        info!(
            target: SIM_TARGET,
            node = node.get(),
            channel = %settings.channel,
            "simulated node started"
        );
        self.nodes.push(handle);
        Ok(())
    }

    /// Addresses of the running nodes.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(NodeHandle::node).collect()
    }

    /// Makes `node` transmit an emergency with `code`, `register` and up to
    /// five bytes of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::UnknownNode`] when no such node runs.
    pub fn trigger_emergency(
        &self,
        node: NodeId,
        code: u16,
        register: u8,
        data: &[u8],
    ) -> Result<(), SimulationError> {
        self.control(
            node,
            Control::Emergency {
                code,
                register,
                data: data.to_vec(),
            },
        )
    }

    /// Makes `node` transmit an error-reset emergency.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::UnknownNode`] when no such node runs.
    pub fn reset_emergency(&self, node: NodeId, register: u8, data: &[u8]) -> Result<(), SimulationError> {
        self.trigger_emergency(node, 0x0000, register, data)
    }

    /// Stops every node.
    pub fn stop(&mut self) {
        for handle in &mut self.nodes {
            handle.stop();
        }
        self.nodes.clear();
    }

    fn handle(&self, node: NodeId) -> Option<&NodeHandle> {
        self.nodes.iter().find(|handle| handle.node() == node)
    }

    fn control(&self, node: NodeId, request: Control) -> Result<(), SimulationError> {
        match self.handle(node) {
            Some(handle) if handle.send(request) => Ok(()),
            _ => Err(SimulationError::UnknownNode { node }),
        }
    }
}

impl Drop for SimulatedNetwork {
    fn drop(&mut self) {
        self.stop();
    }
}
