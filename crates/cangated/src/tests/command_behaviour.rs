//! Behavioural tests for command dispatch against simulated peers.

use std::cell::RefCell;
use std::thread;
use std::time::{Duration, Instant};

use cangate_types::{CommandReply, UNKNOWN_COMMAND_REPLY};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};

use crate::dispatch::NOTHING_OBSERVED;

use super::support::{DaemonRun, GatewayClient, HealthEvent, TestConfigLoader};

type StepResult = Result<(), String>;

const EMERGENCY_WAIT: Duration = Duration::from_secs(3);

struct CommandWorld {
    daemon: Option<DaemonRun>,
    client: Option<GatewayClient>,
    reply: Option<CommandReply>,
    elapsed: Option<Duration>,
}

impl CommandWorld {
    fn new() -> Self {
        Self {
            daemon: None,
            client: None,
            reply: None,
            elapsed: None,
        }
    }

    fn start(&mut self, nodes: &str) -> StepResult {
        let mut daemon = DaemonRun::new(TestConfigLoader::new().with_simulated_nodes(nodes));
        daemon.start()?;
        self.client = Some(GatewayClient::connect(&daemon.loader.socket_path())?);
        self.daemon = Some(daemon);
        Ok(())
    }

    fn call(&mut self, cmd: &str, parameters: Value) -> StepResult {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| "no client connected".to_owned())?;
        let started = Instant::now();
        self.reply = Some(client.call(cmd, parameters)?);
        self.elapsed = Some(started.elapsed());
        Ok(())
    }

    fn call_ok(&mut self, cmd: &str, parameters: Value) -> StepResult {
        self.call(cmd, parameters)?;
        match self.reply.as_ref() {
            Some(reply) if !reply.is_error() => Ok(()),
            other => Err(format!("{cmd} failed: {other:?}")),
        }
    }

    fn reply(&self) -> &CommandReply {
        self.reply.as_ref().expect("a reply should have been received")
    }

    fn reply_parameter(&self, key: &str) -> &Value {
        self.reply()
            .parameter(key)
            .unwrap_or_else(|| panic!("reply should carry '{key}': {:?}", self.reply()))
    }

    fn daemon(&mut self) -> &mut DaemonRun {
        self.daemon.as_mut().expect("gateway should be running")
    }
}

#[fixture]
fn world() -> RefCell<CommandWorld> {
    RefCell::new(CommandWorld::new())
}

fn hex(text: &str) -> Result<u32, String> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|error| format!("'{text}' is not hex: {error}"))
}

fn unquote(text: &str) -> &str {
    text.trim_matches('"')
}

#[given("a running gateway with simulated node {node}")]
fn given_running_gateway(world: &RefCell<CommandWorld>, node: u8) -> StepResult {
    world.borrow_mut().start(&node.to_string())
}

#[given("node {node} is registered with schema {schema}")]
fn given_registered(world: &RefCell<CommandWorld>, node: u8, schema: String) -> StepResult {
    world.borrow_mut().call_ok(
        "add_node",
        json!({ "node_id": node, "schema_ref": unquote(&schema) }),
    )
}

#[when("the client registers node {node} with schema {schema}")]
fn when_registers(world: &RefCell<CommandWorld>, node: u8, schema: String) -> StepResult {
    world.borrow_mut().call(
        "add_node",
        json!({ "node_id": node, "schema_ref": unquote(&schema) }),
    )
}

#[when("the client writes {value} to object {index} of node {node}")]
fn when_writes(world: &RefCell<CommandWorld>, value: i64, index: String, node: u8) -> StepResult {
    let index = hex(&index)?;
    world.borrow_mut().call_ok(
        "sdo_download",
        json!({ "node_id": node, "index": index, "subindex": 0, "data": value }),
    )
}

#[when("the client reads object {index} of node {node}")]
fn when_reads(world: &RefCell<CommandWorld>, index: String, node: u8) -> StepResult {
    let index = hex(&index)?;
    world.borrow_mut().call_ok(
        "sdo_upload",
        json!({ "node_id": node, "index": index, "subindex": 0 }),
    )
}

#[when("the client switches node {node} to {state}")]
fn when_switches(world: &RefCell<CommandWorld>, node: u8, state: String) -> StepResult {
    world
        .borrow_mut()
        .call_ok("nmt_change_state", json!({ "node_id": node, "new_state": state }))
}

#[when("the client reads sub-index {subindex} of object {index} on node {node}")]
fn when_reads_subindex(
    world: &RefCell<CommandWorld>,
    subindex: u8,
    index: String,
    node: u8,
) -> StepResult {
    let index = hex(&index)?;
    world.borrow_mut().call_ok(
        "sdo_upload",
        json!({ "node_id": node, "index": index, "subindex": subindex }),
    )
}

#[when("the client configures transmit slot {slot} of node {node} with type {trans_type} and timer {timer}")]
fn when_configures_tpdo(
    world: &RefCell<CommandWorld>,
    slot: u8,
    node: u8,
    trans_type: u8,
    timer: u16,
) -> StepResult {
    world.borrow_mut().call_ok(
        "pdo_config_tx",
        json!({
            "node_id": node,
            "pdo_number": slot,
            "trans_type": trans_type,
            "event_timer": timer,
            "enabled": true,
        }),
    )
}

#[when("the client waits for message {can_id}")]
fn when_waits(world: &RefCell<CommandWorld>, can_id: String) -> StepResult {
    let can_id = hex(&can_id)?;
    world
        .borrow_mut()
        .call_ok("subscribe_next_msg", json!({ "can_id": can_id }))
}

#[when("the client waits {seconds} seconds for message {can_id}")]
fn when_waits_for(world: &RefCell<CommandWorld>, seconds: u64, can_id: String) -> StepResult {
    let can_id = hex(&can_id)?;
    world.borrow_mut().call_ok(
        "subscribe_next_msg",
        json!({ "can_id": can_id, "timeout": seconds }),
    )
}

#[when("the client activates the timing source every {seconds} seconds")]
fn when_activates_sync(world: &RefCell<CommandWorld>, seconds: u64) -> StepResult {
    world
        .borrow_mut()
        .call_ok("sync_activate_periodic", json!({ "sync_period": seconds }))
}

#[when("the client sends the command {cmd}")]
fn when_sends_command(world: &RefCell<CommandWorld>, cmd: String) -> StepResult {
    world.borrow_mut().call(unquote(&cmd), json!({}))
}

#[when("the client triggers an emergency on node {node}")]
fn when_triggers_emergency(world: &RefCell<CommandWorld>, node: u8) -> StepResult {
    world
        .borrow_mut()
        .call_ok("emcys_trigger_sim", json!({ "node_id": node }))
}

#[then("the reply value is {value}")]
fn then_reply_value(world: &RefCell<CommandWorld>, value: i64) {
    assert_eq!(world.borrow().reply_parameter("value"), &json!(value));
}

#[then("the observed message data is {byte}")]
fn then_observed_data(world: &RefCell<CommandWorld>, byte: u8) {
    assert_eq!(
        world.borrow().reply_parameter("subscribe_msg_data"),
        &json!([byte])
    );
}

#[then("the reply notes that nothing was observed")]
fn then_nothing_observed(world: &RefCell<CommandWorld>) {
    assert_eq!(
        world.borrow().reply_parameter("note"),
        &json!(NOTHING_OBSERVED)
    );
}

#[then("the reply arrived between {seconds} and {limit} seconds")]
fn then_reply_timing(world: &RefCell<CommandWorld>, seconds: f64, limit: f64) {
    let elapsed = world
        .borrow()
        .elapsed
        .expect("a reply should have been timed");
    assert!(
        elapsed >= Duration::from_secs_f64(seconds),
        "returned early after {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs_f64(limit),
        "overran the wait: {elapsed:?}"
    );
}

#[then("the reply sync period is {seconds}")]
fn then_sync_period(world: &RefCell<CommandWorld>, seconds: f64) {
    let period = world.borrow().reply_parameter("sync_period").as_f64();
    assert_eq!(period, Some(seconds));
}

#[then("the reply is an error of kind {kind}")]
fn then_error_kind(world: &RefCell<CommandWorld>, kind: String) {
    let world = world.borrow();
    let reply = world.reply();
    assert!(reply.is_error(), "expected an error reply, got {reply:?}");
    assert_eq!(
        reply.error_kind().map(|found| found.as_str()),
        Some(unquote(&kind))
    );
}

#[then("the reply is the unknown command reply")]
fn then_unknown_command(world: &RefCell<CommandWorld>) {
    assert_eq!(world.borrow().reply().reply_cmd, UNKNOWN_COMMAND_REPLY);
}

#[then("the active emergencies of node {node} include code {code}")]
fn then_active_emergency(world: &RefCell<CommandWorld>, node: u8, code: u64) -> StepResult {
    let deadline = Instant::now() + EMERGENCY_WAIT;
    while Instant::now() < deadline {
        let mut world = world.borrow_mut();
        world.call_ok("emcys_read_active", json!({ "node_id": node }))?;
        let listed = world
            .reply_parameter("value")
            .as_array()
            .is_some_and(|records| {
                records
                    .iter()
                    .any(|record| record.get("code").and_then(Value::as_u64) == Some(code))
            });
        if listed {
            return Ok(());
        }
        drop(world);
        thread::sleep(Duration::from_millis(50));
    }
    Err(format!("emergency {code:#06x} never became active"))
}

#[then("the reply status is {status}")]
fn then_reply_status(world: &RefCell<CommandWorld>, status: String) {
    assert_eq!(
        world.borrow().reply_parameter("status"),
        &json!(unquote(&status))
    );
}

#[then("the gateway stops cleanly")]
fn then_gateway_stops(world: &RefCell<CommandWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    world.client = None;
    world.daemon().join_successfully()
}

#[then("the gateway leaves no runtime files behind")]
fn then_no_runtime_files(world: &RefCell<CommandWorld>) -> StepResult {
    world.borrow_mut().daemon().require_runtime_files_removed()
}

#[then("the gateway close was reported")]
fn then_close_reported(world: &RefCell<CommandWorld>) {
    let events = world.borrow_mut().daemon().reporter.events();
    assert_eq!(events.last(), Some(&HealthEvent::GatewayClosed));
}

#[scenario(
    path = "tests/features/gateway_commands.feature",
    name = "Written objects read back through the gateway"
)]
fn written_objects_read_back(world: RefCell<CommandWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/gateway_commands.feature",
    name = "Pre-operational nodes publish heartbeats"
)]
fn pre_operational_heartbeats(world: RefCell<CommandWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/gateway_commands.feature",
    name = "Waiting on a silent identifier times out with a note"
)]
fn silent_identifier_times_out(world: RefCell<CommandWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/gateway_commands.feature",
    name = "Transmit slot settings survive a node reset"
)]
fn transmit_slot_settings_are_stored(world: RefCell<CommandWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/gateway_commands.feature",
    name = "Re-activating the timing source replaces its period"
)]
fn timing_source_reactivation(world: RefCell<CommandWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/gateway_commands.feature",
    name = "Invalid and duplicate registrations are rejected"
)]
fn registration_rejections(world: RefCell<CommandWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/gateway_commands.feature",
    name = "Unregistered commands are reported"
)]
fn unregistered_commands(world: RefCell<CommandWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/gateway_commands.feature",
    name = "Emergencies from simulated peers appear in the active list"
)]
fn simulated_emergencies(world: RefCell<CommandWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/gateway_commands.feature",
    name = "turn_off stops the gateway"
)]
fn turn_off_stops_gateway(world: RefCell<CommandWorld>) {
    drop(world);
}
