//! Tests for the gateway request cycle against a mocked bus session.

use std::time::Duration;

use cangate_types::{CommandRequest, ErrorKind, UNKNOWN_COMMAND_REPLY};
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::{Gateway, GatewayPhase, NOTHING_OBSERVED};
use crate::bus::{BusError, MockBusSession, NodeId, TransferMode};
use crate::dictionary::{DataType, ObjectDictionary, SchemaError, SchemaLoader};
use crate::sim::builtin_dictionary;

struct BuiltinSchemas;

impl SchemaLoader for BuiltinSchemas {
    fn load(&self, _reference: &str) -> Result<ObjectDictionary, SchemaError> {
        builtin_dictionary()
    }
}

/// A session mock that tolerates the calls made while closing.
#[fixture]
fn session() -> MockBusSession {
    let mut session = MockBusSession::new();
    session.expect_stop_timing_source().returning(|| Ok(false));
    session.expect_close().return_const(());
    session.expect_active_filter_count().return_const(0_usize);
    session
}

fn gateway(session: MockBusSession) -> Gateway {
    Gateway::new(Box::new(session), Box::new(BuiltinSchemas))
}

fn request(cmd: &str, parameters: Value) -> CommandRequest {
    let mut request = CommandRequest::new(cmd);
    if let Value::Object(map) = parameters {
        request.parameters = map;
    }
    request
}

#[rstest]
fn index_zero_is_rejected_before_any_bus_call(mut session: MockBusSession) {
    session.expect_read_object().never();
    let mut gateway = gateway(session);

    let outcome = gateway.dispatch(&request(
        "sdo_upload",
        json!({"node_id": 5, "index": 0, "subindex": 0, "mode": "expedited"}),
    ));

    assert!(outcome.reply.reply_cmd.starts_with("err:"));
    assert_eq!(outcome.reply.error_kind(), Some(ErrorKind::ParameterError));
    assert_eq!(outcome.reply.command(), Some("sdo_upload"));
    assert_eq!(gateway.phase(), GatewayPhase::Idle);
}

#[rstest]
fn unknown_commands_get_a_generic_reply(session: MockBusSession) {
    let mut gateway = gateway(session);
    let outcome = gateway.dispatch(&request("reboot_everything", json!({})));
    assert_eq!(outcome.reply.reply_cmd, UNKNOWN_COMMAND_REPLY);
    assert_eq!(outcome.reply.command(), Some("reboot_everything"));
    assert!(!outcome.shutdown_requested);
}

#[rstest]
fn upload_decodes_with_the_declared_type(mut session: MockBusSession) {
    session
        .expect_read_object()
        .withf(|object, mode| {
            object.node.get() == 5
                && object.index == 0x1017
                && object.subindex == 0
                && *mode == TransferMode::Expedited
        })
        .times(1)
        .returning(|_, _| Ok(2500_u16.to_le_bytes().to_vec()));
    session
        .expect_data_type()
        .returning(|_| Some(DataType::Unsigned16));
    let mut gateway = gateway(session);

    let outcome = gateway.dispatch(&request(
        "sdo_upload",
        json!({"node_id": 5, "index": "0x1017"}),
    ));

    assert_eq!(outcome.reply.reply_cmd, "sdo_upload");
    assert_eq!(outcome.reply.parameter("value"), Some(&json!(2500)));
    assert_eq!(outcome.reply.parameter("index"), Some(&json!(0x1017)));
}

#[rstest]
fn download_encodes_with_the_declared_type(mut session: MockBusSession) {
    session
        .expect_data_type()
        .returning(|_| Some(DataType::Unsigned16));
    session
        .expect_write_object()
        .withf(|_, _, data| data == [0xC4, 0x09])
        .times(1)
        .returning(|_, _, _| Ok(()));
    let mut gateway = gateway(session);

    let outcome = gateway.dispatch(&request(
        "sdo_download",
        json!({"node_id": 5, "index": 4119, "data": 2500}),
    ));

    assert_eq!(outcome.reply.parameter("success"), Some(&json!(true)));
}

#[rstest]
fn bus_timeouts_become_error_replies(mut session: MockBusSession) {
    session.expect_read_object().returning(|object, _| {
        Err(BusError::Timeout {
            operation: "upload",
            node: object.node,
            timeout: Duration::from_secs(2),
        })
    });
    session.expect_data_type().returning(|_| None);
    let mut gateway = gateway(session);

    let outcome = gateway.dispatch(&request("sdo_upload", json!({"node_id": 5, "index": 4096})));

    assert_eq!(outcome.reply.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(gateway.phase(), GatewayPhase::Idle);
}

#[rstest]
fn add_node_loads_the_schema(mut session: MockBusSession) {
    session
        .expect_add_node()
        .withf(|node, dictionary| {
            node.get() == 3 && dictionary.device_name() == Some("SimNode")
        })
        .times(1)
        .returning(|_, _| Ok(()));
    let mut gateway = gateway(session);

    let outcome = gateway.dispatch(&request(
        "add_node",
        json!({"node_id": 3, "schema_ref": "SimNode.eds"}),
    ));

    assert_eq!(outcome.reply.reply_cmd, "add_node");
    assert_eq!(outcome.reply.parameter("node_id"), Some(&json!(3)));
}

#[rstest]
fn wait_timeout_is_a_success_with_a_note(mut session: MockBusSession) {
    session
        .expect_await_frame()
        .withf(|id, timeout| *id == 0x1AF && *timeout == Duration::from_secs(2))
        .returning(|_, _| Ok(None));
    let mut gateway = gateway(session);

    let outcome = gateway.dispatch(&request(
        "subscribe_next_msg",
        json!({"can_id": "0x1AF", "timeout": 2}),
    ));

    assert!(!outcome.reply.is_error());
    assert_eq!(outcome.reply.parameter("note"), Some(&json!(NOTHING_OBSERVED)));
}

#[rstest]
fn turn_off_stops_the_gateway(mut session: MockBusSession) {
    session.checkpoint();
    session
        .expect_stop_timing_source()
        .times(1)
        .returning(|| Ok(true));
    session.expect_close().times(1).return_const(());
    session.expect_active_filter_count().return_const(0_usize);
    let mut gateway = gateway(session);

    let outcome = gateway.dispatch(&request("turn_off", json!({})));
    assert_eq!(outcome.reply.reply_cmd, "turn_off");
    assert!(outcome.shutdown_requested);
    assert!(gateway.is_stopped());

    let after = gateway.dispatch(&request("scanner", json!({})));
    assert_eq!(after.reply.error_kind(), Some(ErrorKind::GatewayStopped));
    assert_eq!(after.reply.command(), Some("scanner"));
    assert!(!after.shutdown_requested);

    gateway.close();
}

#[rstest]
#[case::garbage(b"{not json".as_slice(), "")]
#[case::bad_shape(br#"{"cmd":"scanner","parameters":"all"}"#.as_slice(), "scanner")]
fn malformed_lines_get_error_replies(
    session: MockBusSession,
    #[case] line: &[u8],
    #[case] command: &str,
) {
    let mut gateway = gateway(session);
    let outcome = gateway.dispatch_line(line);
    assert_eq!(outcome.reply.error_kind(), Some(ErrorKind::MalformedRequest));
    assert_eq!(outcome.reply.command(), Some(command));
    assert_eq!(gateway.phase(), GatewayPhase::Idle);
}

#[rstest]
fn pdo_mapping_widths_come_from_the_dictionary(mut session: MockBusSession) {
    session
        .expect_data_type()
        .returning(|_| Some(DataType::Unsigned16));
    session
        .expect_configure_periodic_production()
        .withf(|config| {
            config.node == NodeId::new(5).expect("node")
                && config
                    .mapping
                    .as_ref()
                    .is_some_and(|mapping| mapping.len() == 1 && mapping[0].bit_length == 16)
        })
        .times(1)
        .returning(|_| Ok(()));
    let mut gateway = gateway(session);

    let outcome = gateway.dispatch(&request(
        "pdo_config_tx",
        json!({
            "node_id": 5, "pdo_number": 2, "trans_type": 254, "event_timer": 100,
            "enabled": true, "mapping": [[0x6011, 1]]
        }),
    ));

    assert_eq!(outcome.reply.reply_cmd, "pdo_config_tx");
    assert_eq!(outcome.reply.parameter("mapping"), Some(&json!([[0x6011, 1, 16]])));
    assert_eq!(outcome.reply.parameter("event_timer"), Some(&json!(100)));
}

#[rstest]
fn simulated_commands_need_a_running_network(session: MockBusSession) {
    let mut gateway = gateway(session);
    let outcome = gateway.dispatch(&request("emcys_trigger_sim", json!({"node_id": 5})));
    assert_eq!(outcome.reply.error_kind(), Some(ErrorKind::UnknownNode));
}
