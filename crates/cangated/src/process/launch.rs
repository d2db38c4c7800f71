//! Supervises gateway launch sequencing and runtime orchestration.

use std::sync::Arc;

use cangate_config::RuntimePaths;
use tracing::{info, warn};

use crate::bootstrap::{ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::bus::{BusConnector, CanopenConnector};
use crate::dispatch::{DispatchConnectionHandler, Gateway, GatewayManager};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::transport::SocketListener;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use super::shutdown::{ShutdownSignal, SystemShutdownSignal, shutdown_channel};

/// Collaborators required to launch the gateway runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) connector: Arc<dyn BusConnector>,
    pub(crate) shutdown: S,
}

/// Runs the gateway in the foreground using the production collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when startup fails or shutdown cannot be awaited.
pub fn run_daemon() -> Result<(), LaunchError> {
    run_daemon_with(LaunchPlan {
        loader: SystemConfigLoader,
        reporter: Arc::new(StructuredHealthReporter::new()),
        connector: Arc::new(CanopenConnector),
        shutdown: SystemShutdownSignal,
    })
}

/// Runs the gateway with injected collaborators.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan {
        loader,
        reporter,
        connector,
        shutdown,
    } = plan;

    info!(target: PROCESS_TARGET, "starting gateway runtime");
    let config = loader.load()?;
    config.daemon_socket().prepare_filesystem()?;
    let mut guard = ProcessGuard::acquire(RuntimePaths::from_config(&config)?)?;
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting)?;
    let listener = SocketListener::bind(config.daemon_socket())?;

    let daemon = bootstrap_with(
        &StaticConfigLoader::new(config),
        Arc::clone(&reporter),
        connector.as_ref(),
    )?;
    let manager = GatewayManager::new(daemon.into_gateway());
    let (trigger, requests) = shutdown_channel();
    let handler = DispatchConnectionHandler::new(manager.clone(), trigger.clone());

    let listener_handle = listener.start(handler)?;
    guard.write_health(HealthState::Ready)?;
    let waited = shutdown.wait(&trigger, &requests);
    guard.write_health(HealthState::Stopping)?;
    listener_handle.shutdown();
    listener_handle.join()?;

    if let Err(error) = manager.with_gateway(Gateway::close) {
        warn!(target: PROCESS_TARGET, error = %error, "gateway close failed");
    }
    reporter.gateway_closed();
    let reason = waited?;
    info!(
        target: PROCESS_TARGET,
        ?reason,
        "shutdown sequence completed"
    );
    Ok(())
}
