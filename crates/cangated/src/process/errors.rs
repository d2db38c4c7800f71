//! Failures while starting, supervising or stopping the gateway process.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTimeError;

use cangate_config::{RuntimePathsError, SocketPreparationError};
use nix::errno::Errno;
use ortho_config::OrthoError;
use thiserror::Error;

use super::shutdown::ShutdownError;
use crate::bootstrap::BootstrapError;
use crate::transport::ListenerError;

/// Operation on a runtime file (lock, pid or health snapshot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFileAction {
    /// Creating the exclusive lock file.
    CreateLock,
    /// Removing a file left behind by a gateway that is no longer running.
    RemoveStale,
    /// Recording the gateway's pid.
    WritePid,
    /// Publishing a health snapshot.
    WriteHealth,
}

impl fmt::Display for RuntimeFileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateLock => "create lock file",
            Self::RemoveStale => "remove stale file",
            Self::WritePid => "write pid file",
            Self::WriteHealth => "write health snapshot",
        })
    }
}

/// Errors returned by [`run_daemon`](super::run_daemon).
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration could not be loaded.
    #[error("failed to load configuration: {0}")]
    Config(#[from] Arc<OrthoError>),
    /// The socket's directory could not be prepared.
    #[error("failed to prepare gateway socket: {0}")]
    Socket(#[from] SocketPreparationError),
    /// Runtime file locations could not be derived.
    #[error(transparent)]
    RuntimePaths(#[from] RuntimePathsError),
    /// A runtime file operation failed.
    #[error("failed to {action} '{path}': {source}")]
    RuntimeFile {
        /// What was being done.
        action: RuntimeFileAction,
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Another gateway holds the lock.
    #[error("gateway already running with pid {pid}")]
    AlreadyRunning {
        /// Pid recorded by the running gateway.
        pid: u32,
    },
    /// Probing the pid recorded next to a lock failed.
    #[error("failed to probe process {pid}: {source}")]
    ProbeProcess {
        /// Pid read from the pid file.
        pid: u32,
        /// Error from the probe.
        #[source]
        source: Errno,
    },
    /// A health snapshot was requested before the pid was recorded.
    #[error("health cannot be published before the pid is written")]
    MissingPid,
    /// The health snapshot could not be encoded.
    #[error("failed to encode health snapshot: {0}")]
    HealthEncode(#[from] serde_json::Error),
    /// The system clock is before the Unix epoch.
    #[error("system clock is unusable: {0}")]
    Clock(#[from] SystemTimeError),
    /// The gateway could not be brought up.
    #[error("gateway bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    /// The command socket could not be served.
    #[error("command listener failed: {0}")]
    Listener(#[from] ListenerError),
    /// Waiting for a stop request failed.
    #[error("failed to wait for shutdown: {0}")]
    Shutdown(#[from] ShutdownError),
}

impl LaunchError {
    pub(crate) fn runtime_file(
        action: RuntimeFileAction,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::RuntimeFile {
            action,
            path,
            source,
        }
    }
}
