//! Runs the full launch sequence on a background thread.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::bus::CanopenConnector;
use crate::health::HealthReporter;
use crate::process::{LaunchError, LaunchPlan, run_daemon_with};

use super::config_loader::TestConfigLoader;
use super::reporter::RecordingHealthReporter;
use super::shutdown::ChannelShutdownSignal;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub struct DaemonRun {
    pub loader: TestConfigLoader,
    pub reporter: Arc<RecordingHealthReporter>,
    shutdown: ChannelShutdownSignal,
    handle: Option<thread::JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
}

impl DaemonRun {
    #[must_use]
    pub fn new(loader: TestConfigLoader) -> Self {
        Self {
            loader,
            reporter: Arc::new(RecordingHealthReporter::default()),
            shutdown: ChannelShutdownSignal::default(),
            handle: None,
            result: None,
        }
    }

    fn plan(&self) -> LaunchPlan<TestConfigLoader, ChannelShutdownSignal> {
        LaunchPlan {
            loader: self.loader.clone(),
            reporter: Arc::clone(&self.reporter) as Arc<dyn HealthReporter>,
            connector: Arc::new(CanopenConnector),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Starts the daemon and waits for the ready health snapshot.
    pub fn start(&mut self) -> Result<(), String> {
        if self.handle.is_some() {
            return Err("daemon already running".to_owned());
        }
        let plan = self.plan();
        self.handle = Some(thread::spawn(move || run_daemon_with(plan)));
        self.wait_until(|run| run.health_status().as_deref() == Some("ready"))
            .map_err(|()| "daemon did not publish a ready health snapshot".to_owned())
    }

    /// Runs a second daemon against the same configuration on this thread.
    pub fn run_again(&self) -> Result<(), LaunchError> {
        run_daemon_with(self.plan())
    }

    /// Requests shutdown as a termination signal would.
    pub fn signal(&self) -> Result<(), String> {
        self.wait_until(|run| run.shutdown.trigger())
            .map_err(|()| "daemon never waited for shutdown".to_owned())
    }

    /// Waits for the daemon thread and records its result.
    pub fn join(&mut self) -> Result<(), String> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| "daemon not running".to_owned())?;
        let result = handle
            .join()
            .map_err(|_| "daemon thread panicked".to_owned())?;
        self.result = Some(result);
        Ok(())
    }

    pub fn result(&self) -> Option<&Result<(), LaunchError>> {
        self.result.as_ref()
    }

    /// Joins the daemon thread and requires a clean exit.
    pub fn join_successfully(&mut self) -> Result<(), String> {
        self.join()?;
        match self.result() {
            Some(Ok(())) => Ok(()),
            other => Err(format!("gateway run failed: {other:?}")),
        }
    }

    /// Requires the lock, pid and health files to be gone.
    pub fn require_runtime_files_removed(&self) -> Result<(), String> {
        let remaining = self.runtime_files_remaining();
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(format!("left behind: {remaining:?}"))
        }
    }

    pub fn health_status(&self) -> Option<String> {
        let text = fs::read_to_string(self.loader.runtime_dir().join("cangated.health")).ok()?;
        let snapshot: Value = serde_json::from_str(&text).ok()?;
        snapshot.get("status")?.as_str().map(str::to_owned)
    }

    pub fn runtime_files_remaining(&self) -> Vec<&'static str> {
        ["cangated.lock", "cangated.pid", "cangated.health"]
            .into_iter()
            .filter(|name| self.loader.runtime_dir().join(name).exists())
            .collect()
    }

    fn wait_until(&self, mut ready: impl FnMut(&Self) -> bool) -> Result<(), ()> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if ready(self) {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err(())
    }
}

impl Drop for DaemonRun {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.signal();
            let _ = self.join();
        }
    }
}
