//! Behavioural tests for the gateway bootstrap sequence.

use std::cell::RefCell;
use std::sync::Arc;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, bootstrap_with};
use crate::bus::CanopenConnector;

use super::support::{FailingConfigLoader, HealthEvent, RecordingHealthReporter, TestConfigLoader};

struct BootstrapWorld {
    loader: Box<dyn ConfigLoader>,
    reporter: Arc<RecordingHealthReporter>,
    daemon: Option<Daemon>,
    error: Option<BootstrapError>,
}

impl BootstrapWorld {
    fn new() -> Self {
        Self {
            loader: Box::new(TestConfigLoader::new()),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemon: None,
            error: None,
        }
    }

    fn bootstrap(&mut self) {
        match bootstrap_with(&*self.loader, self.reporter.clone(), &CanopenConnector) {
            Ok(daemon) => self.daemon = Some(daemon),
            Err(error) => self.error = Some(error),
        }
    }

    fn simulated_nodes(&self) -> Vec<u8> {
        self.reporter
            .events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::SimulatedNodeStarted(node) => Some(node),
                _ => None,
            })
            .collect()
    }
}

#[fixture]
fn world() -> RefCell<BootstrapWorld> {
    RefCell::new(BootstrapWorld::new())
}

#[given("a healthy configuration loader")]
fn given_healthy_loader(world: &RefCell<BootstrapWorld>) {
    world.borrow_mut().loader = Box::new(TestConfigLoader::new());
}

#[given("a configuration declaring simulated node {node}")]
fn given_simulated_node(world: &RefCell<BootstrapWorld>, node: u8) {
    world.borrow_mut().loader =
        Box::new(TestConfigLoader::new().with_simulated_nodes(&node.to_string()));
}

#[given("a failing configuration loader")]
fn given_failing_loader(world: &RefCell<BootstrapWorld>) {
    world.borrow_mut().loader = Box::new(FailingConfigLoader);
}

#[when("the gateway bootstrap runs")]
fn when_bootstrap_runs(world: &RefCell<BootstrapWorld>) {
    world.borrow_mut().bootstrap();
}

#[then("bootstrap succeeds")]
fn then_bootstrap_succeeds(world: &RefCell<BootstrapWorld>) {
    let world = world.borrow();
    assert!(world.error.is_none(), "bootstrap error: {:?}", world.error);
    assert!(world.daemon.is_some(), "daemon should be initialised");
}

#[then("bootstrap fails")]
fn then_bootstrap_fails(world: &RefCell<BootstrapWorld>) {
    let world = world.borrow();
    assert!(
        matches!(world.error, Some(BootstrapError::Configuration { .. })),
        "expected a configuration error, got {:?}",
        world.error
    );
}

#[then("the bus connection was reported")]
fn then_bus_reported(world: &RefCell<BootstrapWorld>) {
    let events = world.borrow().reporter.events();
    assert!(
        events
            .iter()
            .any(|event| matches!(event, HealthEvent::BusConnected(_))),
        "expected a bus connection event, got {events:?}"
    );
    assert_eq!(events.last(), Some(&HealthEvent::BootstrapSucceeded));
}

#[then("simulated node {node} was reported")]
fn then_node_reported(world: &RefCell<BootstrapWorld>, node: u8) {
    assert_eq!(world.borrow().simulated_nodes(), vec![node]);
}

#[then("no simulated node was reported")]
fn then_no_node_reported(world: &RefCell<BootstrapWorld>) {
    assert!(world.borrow().simulated_nodes().is_empty());
}

#[then("the failure was reported")]
fn then_failure_reported(world: &RefCell<BootstrapWorld>) {
    let events = world.borrow().reporter.events();
    assert_eq!(events.first(), Some(&HealthEvent::BootstrapStarting));
    assert!(
        matches!(events.last(), Some(HealthEvent::BootstrapFailed(_))),
        "expected a failure event, got {events:?}"
    );
}

#[scenario(
    path = "tests/features/gateway_bootstrap.feature",
    name = "Bootstrap opens the bus and attaches simulated peers"
)]
fn bootstrap_with_simulated_peers(world: RefCell<BootstrapWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/gateway_bootstrap.feature",
    name = "Bootstrap without simulated peers"
)]
fn bootstrap_without_simulated_peers(world: RefCell<BootstrapWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/gateway_bootstrap.feature",
    name = "Bootstrap reports configuration failures"
)]
fn bootstrap_reports_failures(world: RefCell<BootstrapWorld>) {
    drop(world);
}
