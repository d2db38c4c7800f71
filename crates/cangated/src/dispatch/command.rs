//! The closed set of gateway commands.
//!
//! A request is resolved in two steps: its name to a [`CommandName`], then
//! its parameters to a fully validated [`Command`]. Every domain check that
//! does not need the bus (address range, state names, transfer modes, frame
//! limits) happens here, so a rejected request never reaches the session.

use std::time::Duration;

use cangate_types::Parameters;
use serde_json::Value;

use super::errors::DispatchError;
use super::params::Params;
use crate::bus::{
    BusError, CanFrame, ErrorStateKind, MAX_CAN_ID, MappedObject, NmtState, NodeId,
    ObjectAddress, PdoSlot, TransferMode,
};

/// Wait applied when `subscribe_next_msg` names no timeout.
pub(crate) const DEFAULT_WAIT: Duration = Duration::from_secs(3);
/// Longest wait a caller may request.
pub(crate) const MAX_WAIT: Duration = Duration::from_secs(600);
/// Shortest timing-source period accepted.
pub(crate) const MIN_SYNC_PERIOD: Duration = Duration::from_millis(1);
/// Mapping entries a process-data slot can hold.
pub(crate) const MAX_MAPPED_OBJECTS: usize = 64;

#[cfg(any(test, feature = "sim-network"))]
const DEFAULT_SIM_CODE: u16 = 0x3001;
#[cfg(any(test, feature = "sim-network"))]
const DEFAULT_SIM_REGISTER: u8 = 0x04;
#[cfg(any(test, feature = "sim-network"))]
const MAX_SIM_DATA: usize = 5;

/// Registered command names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    AddNode,
    Scanner,
    NmtChangeState,
    PdoConfigTx,
    SdoUpload,
    SdoDownload,
    EmcysReadActive,
    EmcysReadLog,
    SubscribeNextMsg,
    SyncActivatePeriodic,
    SyncDeactivatePeriodic,
    CanSendMsg,
    TurnOff,
    #[cfg(any(test, feature = "sim-network"))]
    EmcysTriggerSim,
    #[cfg(any(test, feature = "sim-network"))]
    EmcysResetSim,
}

impl CommandName {
    /// Every registered name.
    pub const ALL: &'static [Self] = &[
        Self::AddNode,
        Self::Scanner,
        Self::NmtChangeState,
        Self::PdoConfigTx,
        Self::SdoUpload,
        Self::SdoDownload,
        Self::EmcysReadActive,
        Self::EmcysReadLog,
        Self::SubscribeNextMsg,
        Self::SyncActivatePeriodic,
        Self::SyncDeactivatePeriodic,
        Self::CanSendMsg,
        Self::TurnOff,
        #[cfg(any(test, feature = "sim-network"))]
        Self::EmcysTriggerSim,
        #[cfg(any(test, feature = "sim-network"))]
        Self::EmcysResetSim,
    ];

    /// Resolves a wire name; names are case sensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|name| name.as_str() == raw)
    }

    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddNode => "add_node",
            Self::Scanner => "scanner",
            Self::NmtChangeState => "nmt_change_state",
            Self::PdoConfigTx => "pdo_config_tx",
            Self::SdoUpload => "sdo_upload",
            Self::SdoDownload => "sdo_download",
            Self::EmcysReadActive => "emcys_read_active",
            Self::EmcysReadLog => "emcys_read_log",
            Self::SubscribeNextMsg => "subscribe_next_msg",
            Self::SyncActivatePeriodic => "sync_activate_periodic",
            Self::SyncDeactivatePeriodic => "sync_deactivate_periodic",
            Self::CanSendMsg => "can_send_msg",
            Self::TurnOff => "turn_off",
            #[cfg(any(test, feature = "sim-network"))]
            Self::EmcysTriggerSim => "emcys_trigger_sim",
            #[cfg(any(test, feature = "sim-network"))]
            Self::EmcysResetSim => "emcys_reset_sim",
        }
    }

    /// Parameters that must be present. Each entry lists accepted aliases,
    /// preferred name first.
    pub const fn required(self) -> &'static [&'static [&'static str]] {
        match self {
            Self::AddNode => &[&["node_id"], &["schema_ref", "EDS"]],
            Self::NmtChangeState => &[&["node_id"], &["new_state"]],
            Self::PdoConfigTx => &[
                &["node_id"],
                &["pdo_number"],
                &["trans_type"],
                &["event_timer"],
                &["enabled"],
            ],
            Self::SdoUpload => &[&["node_id"], &["index"]],
            Self::SdoDownload => &[&["node_id"], &["index"], &["data"]],
            Self::EmcysReadActive | Self::EmcysReadLog => &[&["node_id"]],
            Self::SubscribeNextMsg => &[&["can_id"]],
            Self::SyncActivatePeriodic => &[&["sync_period"]],
            Self::CanSendMsg => &[&["can_id"], &["can_bytes"]],
            Self::Scanner | Self::SyncDeactivatePeriodic | Self::TurnOff => &[],
            #[cfg(any(test, feature = "sim-network"))]
            Self::EmcysTriggerSim | Self::EmcysResetSim => &[&["node_id"]],
        }
    }
}

/// One requested mapping entry; a missing width is taken from the node's
/// dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingRequest {
    pub index: u16,
    pub subindex: u8,
    pub bit_length: Option<u8>,
}

/// Validated `pdo_config_tx` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdoRequest {
    pub node: NodeId,
    pub slot: PdoSlot,
    pub transmission_type: u8,
    pub event_timer_ms: u16,
    pub enabled: bool,
    pub mapping: Option<Vec<MappingRequest>>,
}

/// A validated command ready to run against the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddNode {
        node: NodeId,
        schema: String,
    },
    Scanner,
    NmtChangeState {
        node: NodeId,
        state: NmtState,
    },
    PdoConfigTx(PdoRequest),
    SdoUpload {
        object: ObjectAddress,
        mode: TransferMode,
    },
    SdoDownload {
        object: ObjectAddress,
        mode: TransferMode,
        data: Value,
    },
    EmcysRead {
        node: NodeId,
        kind: ErrorStateKind,
    },
    SubscribeNextMsg {
        can_id: u32,
        timeout: Duration,
    },
    SyncActivatePeriodic {
        period: Duration,
    },
    SyncDeactivatePeriodic,
    CanSendMsg {
        frame: CanFrame,
    },
    TurnOff,
    #[cfg(any(test, feature = "sim-network"))]
    EmcysTriggerSim {
        node: NodeId,
        code: u16,
        register: u8,
        data: Vec<u8>,
    },
    #[cfg(any(test, feature = "sim-network"))]
    EmcysResetSim {
        node: NodeId,
        register: u8,
        data: Vec<u8>,
    },
}

impl Command {
    /// Validates `parameters` for `name`.
    ///
    /// # Errors
    ///
    /// Returns a parameter error for missing or mistyped values, or the
    /// domain error (invalid address, state, slot, mode or length) for
    /// values outside their range.
    pub fn from_request(name: CommandName, parameters: &Parameters) -> Result<Self, DispatchError> {
        let params = Params::new(parameters);
        for aliases in name.required() {
            params.value_of_any(aliases)?;
        }
        match name {
            CommandName::AddNode => {
                let (key, schema) = params.value_of_any(&["schema_ref", "EDS"])?;
                let schema = schema.as_str().ok_or_else(|| {
                    DispatchError::parameter(format!("parameter '{key}' must be a string"))
                })?;
                Ok(Self::AddNode {
                    node: node_id(&params)?,
                    schema: schema.to_owned(),
                })
            }
            CommandName::Scanner => Ok(Self::Scanner),
            CommandName::NmtChangeState => Ok(Self::NmtChangeState {
                node: node_id(&params)?,
                state: NmtState::parse(params.text("new_state")?)?,
            }),
            CommandName::PdoConfigTx => Ok(Self::PdoConfigTx(PdoRequest {
                node: node_id(&params)?,
                slot: PdoSlot::new(params.wide("pdo_number")?)?,
                transmission_type: params.bounded("trans_type")?,
                event_timer_ms: params.bounded("event_timer")?,
                enabled: params.boolean("enabled")?,
                mapping: params.optional_value("mapping").map(mapping).transpose()?,
            })),
            CommandName::SdoUpload => Ok(Self::SdoUpload {
                object: object_address(&params)?,
                mode: transfer_mode(&params)?,
            }),
            CommandName::SdoDownload => Ok(Self::SdoDownload {
                object: object_address(&params)?,
                mode: transfer_mode(&params)?,
                data: params.value("data")?.clone(),
            }),
            CommandName::EmcysReadActive => Ok(Self::EmcysRead {
                node: node_id(&params)?,
                kind: ErrorStateKind::Active,
            }),
            CommandName::EmcysReadLog => Ok(Self::EmcysRead {
                node: node_id(&params)?,
                kind: ErrorStateKind::Log,
            }),
            CommandName::SubscribeNextMsg => {
                let timeout = params.optional_seconds("timeout")?.unwrap_or(DEFAULT_WAIT);
                if timeout > MAX_WAIT {
                    return Err(DispatchError::parameter(format!(
                        "parameter 'timeout' must not exceed {} seconds",
                        MAX_WAIT.as_secs()
                    )));
                }
                Ok(Self::SubscribeNextMsg {
                    can_id: can_id(&params)?,
                    timeout,
                })
            }
            CommandName::SyncActivatePeriodic => {
                let period = params.seconds("sync_period")?;
                if period < MIN_SYNC_PERIOD {
                    return Err(DispatchError::parameter(format!(
                        "parameter 'sync_period' must be at least {} ms",
                        MIN_SYNC_PERIOD.as_millis()
                    )));
                }
                Ok(Self::SyncActivatePeriodic { period })
            }
            CommandName::SyncDeactivatePeriodic => Ok(Self::SyncDeactivatePeriodic),
            CommandName::CanSendMsg => Ok(Self::CanSendMsg {
                frame: CanFrame::new(can_id(&params)?, params.bytes("can_bytes")?)?,
            }),
            CommandName::TurnOff => Ok(Self::TurnOff),
            #[cfg(any(test, feature = "sim-network"))]
            CommandName::EmcysTriggerSim => Ok(Self::EmcysTriggerSim {
                node: node_id(&params)?,
                code: params.optional_bounded("code")?.unwrap_or(DEFAULT_SIM_CODE),
                register: params
                    .optional_bounded("register")?
                    .unwrap_or(DEFAULT_SIM_REGISTER),
                data: sim_data(&params, b"Under")?,
            }),
            #[cfg(any(test, feature = "sim-network"))]
            CommandName::EmcysResetSim => Ok(Self::EmcysResetSim {
                node: node_id(&params)?,
                register: params
                    .optional_bounded("register")?
                    .unwrap_or(DEFAULT_SIM_REGISTER),
                data: sim_data(&params, b"CLEAR")?,
            }),
        }
    }
}

fn node_id(params: &Params<'_>) -> Result<NodeId, DispatchError> {
    Ok(NodeId::new(params.wide("node_id")?)?)
}

fn object_address(params: &Params<'_>) -> Result<ObjectAddress, DispatchError> {
    let node = node_id(params)?;
    let index: u16 = params.bounded("index")?;
    if index == 0 {
        return Err(DispatchError::parameter("parameter 'index' must not be 0"));
    }
    let subindex = params.optional_bounded("subindex")?.unwrap_or(0);
    Ok(ObjectAddress::new(node, index, subindex))
}

fn transfer_mode(params: &Params<'_>) -> Result<TransferMode, DispatchError> {
    match params.optional_text("mode")? {
        Some(raw) => Ok(TransferMode::parse(raw)?),
        None => Ok(TransferMode::default()),
    }
}

fn can_id(params: &Params<'_>) -> Result<u32, DispatchError> {
    let raw = params.integer("can_id")?;
    let id = u64::try_from(raw)
        .map_err(|_| DispatchError::parameter(format!("parameter 'can_id' value {raw} is negative")))?;
    match u32::try_from(id) {
        Ok(id) if id <= MAX_CAN_ID => Ok(id),
        _ => Err(BusError::InvalidIdentifier { id }.into()),
    }
}

fn mapping(value: &Value) -> Result<Vec<MappingRequest>, DispatchError> {
    let Value::Array(entries) = value else {
        return Err(DispatchError::parameter(
            "parameter 'mapping' must be an array of mapping entries",
        ));
    };
    if entries.len() > MAX_MAPPED_OBJECTS {
        return Err(DispatchError::parameter(format!(
            "parameter 'mapping' holds {} entries, at most {MAX_MAPPED_OBJECTS} are allowed",
            entries.len()
        )));
    }
    entries.iter().map(mapping_entry).collect()
}

/// Accepts `[index, subindex, bits]`, `{"index", "subindex", "bit_length"}`
/// or an encoded mapping word.
fn mapping_entry(entry: &Value) -> Result<MappingRequest, DispatchError> {
    match entry {
        Value::Array(parts) if (2..=3).contains(&parts.len()) => {
            let mut fields = Parameters::new();
            for (key, part) in ["index", "subindex", "bit_length"].iter().zip(parts) {
                fields.insert((*key).to_owned(), part.clone());
            }
            mapping_fields(&fields)
        }
        Value::Object(fields) => mapping_fields(fields),
        Value::Number(_) | Value::String(_) => {
            let mut fields = Parameters::new();
            fields.insert("mapping".to_owned(), entry.clone());
            let word: u32 = Params::new(&fields).bounded("mapping")?;
            let decoded = MappedObject::decode(word);
            if decoded.bit_length == 0 {
                return Err(DispatchError::parameter(format!(
                    "mapping entry {word:#010x} has no bit length"
                )));
            }
            Ok(MappingRequest {
                index: decoded.index,
                subindex: decoded.subindex,
                bit_length: Some(decoded.bit_length),
            })
        }
        other => Err(DispatchError::parameter(format!(
            "mapping entry {other} must be [index, subindex, bits], an object or a mapping word"
        ))),
    }
}

fn mapping_fields(fields: &Parameters) -> Result<MappingRequest, DispatchError> {
    let params = Params::new(fields);
    let bit_length = params.optional_bounded::<u8>("bit_length")?;
    if bit_length == Some(0) {
        return Err(DispatchError::parameter("mapping bit_length must not be 0"));
    }
    Ok(MappingRequest {
        index: params.bounded("index")?,
        subindex: params.bounded("subindex")?,
        bit_length,
    })
}

#[cfg(any(test, feature = "sim-network"))]
fn sim_data(params: &Params<'_>, default: &[u8]) -> Result<Vec<u8>, DispatchError> {
    let data = match params.optional_value("data") {
        None => default.to_vec(),
        Some(Value::String(text)) => text.as_bytes().to_vec(),
        Some(_) => params.bytes("data")?,
    };
    if data.len() > MAX_SIM_DATA {
        return Err(DispatchError::parameter(format!(
            "parameter 'data' holds {} bytes, at most {MAX_SIM_DATA} are allowed",
            data.len()
        )));
    }
    Ok(data)
}
