//! Bus adapter selection and simulated peer declarations.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::Config;

/// Adapter used to reach the field bus.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[strum(ascii_case_insensitive)]
pub enum BusAdapter {
    /// Linux SocketCAN interface.
    #[default]
    #[serde(rename = "socketcan")]
    #[strum(serialize = "socketcan")]
    SocketCan,
    /// In-process bus shared by every interface opened on the same channel.
    #[serde(rename = "virtual")]
    #[strum(serialize = "virtual")]
    Virtual,
}

/// Errors encountered while parsing a [`BusAdapter`] from text.
pub type BusAdapterParseError = strum::ParseError;

/// Connection parameters handed to the bus layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    /// Adapter kind.
    pub adapter: BusAdapter,
    /// Adapter channel name.
    pub channel: String,
    /// Nominal bitrate in bit/s.
    pub bitrate: u32,
    /// Timeout applied to each object transfer exchange.
    pub sdo_timeout: Duration,
    /// Window during which discovery replies are collected.
    pub scan_window: Duration,
}

impl BusSettings {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            adapter: config.bus_adapter,
            channel: config.bus_channel.clone(),
            bitrate: config.bus_bitrate,
            sdo_timeout: Duration::from_millis(config.sdo_timeout_ms),
            scan_window: Duration::from_millis(config.scan_window_ms),
        }
    }

    /// Settings for an in-process bus on `channel`, used by tests and demos.
    #[must_use]
    pub fn virtual_channel(channel: impl Into<String>) -> Self {
        Self {
            adapter: BusAdapter::Virtual,
            channel: channel.into(),
            bitrate: crate::DEFAULT_BUS_BITRATE,
            sdo_timeout: Duration::from_millis(crate::DEFAULT_SDO_TIMEOUT_MS),
            scan_window: Duration::from_millis(crate::DEFAULT_SCAN_WINDOW_MS),
        }
    }
}

/// A simulated peer: its node address and optional schema reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNode {
    /// Node address in `1..=127`.
    pub node_id: u8,
    /// Schema file relative to the schema directory; `None` selects the
    /// built-in simulated device.
    pub schema: Option<String>,
}

/// Comma separated list of simulated peers, for example `3` or
/// `3=SimNode.eds,5`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct SimulatedNodes(Vec<SimulatedNode>);

impl SimulatedNodes {
    /// Iterates over the declared peers.
    pub fn iter(&self) -> impl Iterator<Item = &SimulatedNode> {
        self.0.iter()
    }

    /// Returns `true` when no peers are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for SimulatedNodes {
    type Err = SimulatedNodesParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut nodes: Vec<SimulatedNode> = Vec::new();
        for entry in input.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let (id_text, schema) = match entry.split_once('=') {
                Some((id, schema)) => (id.trim(), Some(schema.trim().to_owned())),
                None => (entry, None),
            };
            let node_id = parse_node_id(id_text)?;
            if nodes.iter().any(|node| node.node_id == node_id) {
                return Err(SimulatedNodesParseError::Duplicate { node_id });
            }
            nodes.push(SimulatedNode { node_id, schema });
        }
        Ok(Self(nodes))
    }
}

fn parse_node_id(text: &str) -> Result<u8, SimulatedNodesParseError> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse::<u8>(),
    };
    match parsed {
        Ok(node_id) if (1..=127).contains(&node_id) => Ok(node_id),
        _ => Err(SimulatedNodesParseError::InvalidNode {
            value: text.to_owned(),
        }),
    }
}

impl fmt::Display for SimulatedNodes {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, node) in self.0.iter().enumerate() {
            if position > 0 {
                formatter.write_str(",")?;
            }
            match &node.schema {
                Some(schema) => write!(formatter, "{}={schema}", node.node_id)?,
                None => write!(formatter, "{}", node.node_id)?,
            }
        }
        Ok(())
    }
}

// Environment values such as `CANGATE_SIMULATED_NODES=3` arrive as integers.
#[derive(Deserialize)]
#[serde(untagged)]
enum NodesRepr {
    Text(String),
    Single(u64),
}

impl<'de> Deserialize<'de> for SimulatedNodes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = match NodesRepr::deserialize(deserializer)? {
            NodesRepr::Text(text) => text,
            NodesRepr::Single(value) => value.to_string(),
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

impl From<SimulatedNodes> for String {
    fn from(value: SimulatedNodes) -> Self {
        value.to_string()
    }
}

/// Errors raised while parsing [`SimulatedNodes`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimulatedNodesParseError {
    /// A node address was not a number in `1..=127`.
    #[error("invalid simulated node address '{value}'")]
    InvalidNode {
        /// Offending text.
        value: String,
    },
    /// The same address was declared twice.
    #[error("simulated node {node_id} declared more than once")]
    Duplicate {
        /// Repeated address.
        node_id: u8,
    },
}
