//! Typed handlers, one per command.
//!
//! Each handler receives validated parameters, performs its bus operations
//! through the [`Context`] and returns the success payload.

use std::time::Duration;

use cangate_types::Parameters;
use serde_json::{Value, json};
use tracing::debug;

use super::DISPATCH_TARGET;
use super::command::{MappingRequest, PdoRequest};
use super::errors::DispatchError;
use crate::bus::{
    BusError, BusSession, CanFrame, ErrorStateKind, FaultRecord, MappedObject, NmtState, NodeId,
    ObjectAddress, TpdoConfig, TransferMode, describe_emergency, epoch_seconds,
};
use crate::dictionary::{SchemaLoader, decode, encode};
#[cfg(any(test, feature = "sim-network"))]
use crate::sim::{SimulatedNetwork, SimulationError};

/// Note carried by `subscribe_next_msg` when the wait times out.
pub(crate) const NOTHING_OBSERVED: &str = "no message observed";

/// Largest process-data payload in bits.
const MAX_PDO_BITS: u32 = 64;

/// Collaborators available to handlers for one command.
pub(crate) struct Context<'a> {
    pub(crate) session: &'a mut dyn BusSession,
    pub(crate) schemas: &'a dyn SchemaLoader,
    #[cfg(any(test, feature = "sim-network"))]
    pub(crate) simulation: Option<&'a SimulatedNetwork>,
}

type HandlerResult = Result<Parameters, DispatchError>;

pub(crate) fn add_node(context: &mut Context<'_>, node: NodeId, schema: &str) -> HandlerResult {
    let dictionary = context.schemas.load(schema)?;
    context.session.add_node(node, dictionary)?;
    Ok(payload(json!({ "node_id": node.get() })))
}

pub(crate) fn scanner(context: &mut Context<'_>) -> HandlerResult {
    let nodes: Vec<u8> = context.session.scan()?.into_iter().map(NodeId::get).collect();
    Ok(payload(json!({ "nodes": nodes })))
}

pub(crate) fn nmt_change_state(
    context: &mut Context<'_>,
    node: NodeId,
    state: NmtState,
) -> HandlerResult {
    context.session.set_node_state(node, state)?;
    Ok(payload(json!({
        "node_id": node.get(),
        "new_state": state.as_str(),
    })))
}

pub(crate) fn pdo_config_tx(context: &mut Context<'_>, request: &PdoRequest) -> HandlerResult {
    let mapping = request
        .mapping
        .as_deref()
        .map(|entries| resolve_mapping(&*context.session, request.node, entries))
        .transpose()?;
    let config = TpdoConfig {
        node: request.node,
        slot: request.slot,
        transmission_type: request.transmission_type,
        event_timer_ms: request.event_timer_ms,
        enabled: request.enabled,
        mapping,
    };
    context.session.configure_periodic_production(&config)?;

    let mut reply = payload(json!({
        "node_id": config.node.get(),
        "pdo_number": config.slot.get(),
        "trans_type": config.transmission_type,
        "event_timer": config.event_timer_ms,
        "enabled": config.enabled,
    }));
    if let Some(mapping) = &config.mapping {
        let entries: Vec<Value> = mapping
            .iter()
            .map(|entry| json!([entry.index, entry.subindex, entry.bit_length]))
            .collect();
        reply.insert("mapping".to_owned(), Value::from(entries));
    }
    Ok(reply)
}

fn resolve_mapping(
    session: &dyn BusSession,
    node: NodeId,
    entries: &[MappingRequest],
) -> Result<Vec<MappedObject>, DispatchError> {
    let mut total_bits = 0_u32;
    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        let bit_length = match entry.bit_length {
            Some(bits) => bits,
            None => declared_bits(session, ObjectAddress::new(node, entry.index, entry.subindex))?,
        };
        total_bits += u32::from(bit_length);
        resolved.push(MappedObject {
            index: entry.index,
            subindex: entry.subindex,
            bit_length,
        });
    }
    if total_bits > MAX_PDO_BITS {
        return Err(DispatchError::parameter(format!(
            "mapping spans {total_bits} bits, at most {MAX_PDO_BITS} fit one message"
        )));
    }
    Ok(resolved)
}

fn declared_bits(session: &dyn BusSession, object: ObjectAddress) -> Result<u8, DispatchError> {
    session
        .data_type(object)
        .and_then(|data_type| data_type.size())
        .and_then(|bytes| u8::try_from(bytes * 8).ok())
        .ok_or_else(|| {
            DispatchError::parameter(format!(
                "mapping entry {:#06x}:{} needs a bit_length",
                object.index, object.subindex
            ))
        })
}

pub(crate) fn sdo_upload(
    context: &mut Context<'_>,
    object: ObjectAddress,
    mode: TransferMode,
) -> HandlerResult {
    let bytes = context.session.read_object(object, mode)?;
    let value = decode(&bytes, context.session.data_type(object));
    debug!(
        target: DISPATCH_TARGET,
        object = %object,
        mode = mode.as_str(),
        len = bytes.len(),
        "object read"
    );
    Ok(payload(json!({
        "index": object.index,
        "subindex": object.subindex,
        "value": value,
    })))
}

pub(crate) fn sdo_download(
    context: &mut Context<'_>,
    object: ObjectAddress,
    mode: TransferMode,
    data: &Value,
) -> HandlerResult {
    let bytes = encode(data, context.session.data_type(object)).map_err(BusError::from)?;
    context.session.write_object(object, mode, &bytes)?;
    debug!(
        target: DISPATCH_TARGET,
        object = %object,
        mode = mode.as_str(),
        len = bytes.len(),
        "object written"
    );
    Ok(payload(json!({
        "index": object.index,
        "subindex": object.subindex,
        "success": true,
    })))
}

pub(crate) fn emcys_read(
    context: &mut Context<'_>,
    node: NodeId,
    kind: ErrorStateKind,
) -> HandlerResult {
    let records = context.session.read_error_state(node, kind)?;
    let value: Vec<Value> = records.iter().map(fault_json).collect();
    Ok(payload(json!({
        "node_id": node.get(),
        "value": value,
    })))
}

fn fault_json(record: &FaultRecord) -> Value {
    json!({
        "code": record.code,
        "register": record.register,
        "data": record.data,
        "description": describe_emergency(record.code),
        "timestamp": epoch_seconds(record.timestamp),
    })
}

pub(crate) fn subscribe_next_msg(
    context: &mut Context<'_>,
    can_id: u32,
    timeout: Duration,
) -> HandlerResult {
    let observed = context.session.await_frame(can_id, timeout)?;
    Ok(match observed {
        Some(observed) => payload(json!({
            "subscribe_msg_id": observed.frame.id(),
            "subscribe_msg_data": observed.frame.data(),
            "subscribe_msg_timestamp": epoch_seconds(observed.timestamp),
        })),
        None => payload(json!({
            "subscribe_msg_id": can_id,
            "timeout": timeout.as_secs_f64(),
            "note": NOTHING_OBSERVED,
        })),
    })
}

pub(crate) fn sync_activate_periodic(context: &mut Context<'_>, period: Duration) -> HandlerResult {
    context.session.start_timing_source(period)?;
    Ok(payload(json!({ "sync_period": period.as_secs_f64() })))
}

pub(crate) fn sync_deactivate_periodic(context: &mut Context<'_>) -> HandlerResult {
    let was_running = context.session.stop_timing_source()?;
    debug!(target: DISPATCH_TARGET, was_running, "timing source deactivated");
    Ok(Parameters::new())
}

pub(crate) fn can_send_msg(context: &mut Context<'_>, frame: &CanFrame) -> HandlerResult {
    context.session.send_raw_frame(frame)?;
    Ok(payload(json!({
        "can_id": frame.id(),
        "can_bytes": frame.data(),
    })))
}

pub(crate) fn turn_off() -> HandlerResult {
    Ok(payload(json!({ "status": "stopping" })))
}

#[cfg(any(test, feature = "sim-network"))]
pub(crate) fn emcys_trigger_sim(
    context: &mut Context<'_>,
    node: NodeId,
    code: u16,
    register: u8,
    data: &[u8],
) -> HandlerResult {
    simulation(context, node)?.trigger_emergency(node, code, register, data)?;
    Ok(payload(json!({ "node_id": node.get(), "value": "triggered" })))
}

#[cfg(any(test, feature = "sim-network"))]
pub(crate) fn emcys_reset_sim(
    context: &mut Context<'_>,
    node: NodeId,
    register: u8,
    data: &[u8],
) -> HandlerResult {
    simulation(context, node)?.reset_emergency(node, register, data)?;
    Ok(payload(json!({ "node_id": node.get(), "value": "reset" })))
}

#[cfg(any(test, feature = "sim-network"))]
fn simulation<'a>(
    context: &Context<'a>,
    node: NodeId,
) -> Result<&'a SimulatedNetwork, DispatchError> {
    context
        .simulation
        .ok_or_else(|| SimulationError::UnknownNode { node }.into())
}

fn payload(value: Value) -> Parameters {
    match value {
        Value::Object(map) => map,
        _ => Parameters::new(),
    }
}
