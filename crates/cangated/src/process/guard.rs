//! Singleton lock, pid file and health snapshot for the running gateway.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use cangate_config::RuntimePaths;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::errors::{LaunchError, RuntimeFileAction};

/// Holds the runtime artefacts for as long as the gateway runs; dropping it
/// removes them.
#[derive(Debug)]
pub(crate) struct ProcessGuard {
    paths: RuntimePaths,
    _lock: File,
    pid: Option<u32>,
}

impl ProcessGuard {
    /// Takes the singleton lock, clearing artefacts left by a dead process.
    pub(crate) fn acquire(paths: RuntimePaths) -> Result<Self, LaunchError> {
        let lock = acquire_lock(&paths)?;
        Ok(Self {
            paths,
            _lock: lock,
            pid: None,
        })
    }

    pub(crate) fn write_pid(&mut self, pid: u32) -> Result<(), LaunchError> {
        let path = self.paths.pid_path();
        write_private(path, format!("{pid}\n").as_bytes())
            .map_err(LaunchError::runtime_file(RuntimeFileAction::WritePid, path))?;
        self.pid = Some(pid);
        info!(
            target: PROCESS_TARGET,
            pid,
            file = %path.display(),
            "pid file written"
        );
        Ok(())
    }

    pub(crate) fn write_health(&self, state: HealthState) -> Result<(), LaunchError> {
        let pid = self.pid.ok_or(LaunchError::MissingPid)?;
        let snapshot = HealthSnapshot::new(state, pid)?;
        let mut contents = serde_json::to_vec(&snapshot)?;
        contents.push(b'\n');
        let path = self.paths.health_path();
        write_private(path, &contents)
            .map_err(LaunchError::runtime_file(RuntimeFileAction::WriteHealth, path))?;
        info!(
            target: PROCESS_TARGET,
            status = snapshot.status,
            file = %path.display(),
            "health snapshot updated"
        );
        Ok(())
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let artefacts = [
            ("lock", self.paths.lock_path()),
            ("pid", self.paths.pid_path()),
            ("health", self.paths.health_path()),
        ];
        for (kind, path) in artefacts {
            if let Err(error) = fs::remove_file(path)
                && error.kind() != io::ErrorKind::NotFound
            {
                warn!(
                    target: PROCESS_TARGET,
                    kind,
                    file = %path.display(),
                    error = %error,
                    "failed to remove runtime file"
                );
            }
        }
    }
}

/// Lifecycle state published in the health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HealthState {
    Starting,
    Ready,
    Stopping,
}

impl HealthState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthSnapshot {
    status: &'static str,
    pid: u32,
    timestamp: u64,
}

impl HealthSnapshot {
    fn new(state: HealthState, pid: u32) -> Result<Self, LaunchError> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        Ok(Self {
            status: state.as_str(),
            pid,
            timestamp,
        })
    }
}

fn private_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = private_options().create(true).truncate(true).open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn acquire_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    match private_options().create_new(true).open(paths.lock_path()) {
        Ok(file) => {
            info!(
                target: PROCESS_TARGET,
                file = %paths.lock_path().display(),
                "acquired gateway lock"
            );
            Ok(file)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => reclaim_stale_lock(paths),
        Err(source) => Err(LaunchError::runtime_file(
            RuntimeFileAction::CreateLock,
            paths.lock_path(),
        )(source)),
    }
}

fn reclaim_stale_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    if let Some(pid) = read_pid(paths.pid_path()) {
        if process_alive(pid)? {
            info!(
                target: PROCESS_TARGET,
                pid,
                "refusing to start: existing gateway alive"
            );
            return Err(LaunchError::AlreadyRunning { pid });
        }
        warn!(
            target: PROCESS_TARGET,
            pid,
            "existing gateway not detected; cleaning stale files"
        );
    }
    remove_stale(paths.lock_path())?;
    remove_stale(paths.pid_path())?;
    acquire_lock(paths)
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid != 0)
}

fn remove_stale(path: &Path) -> Result<(), LaunchError> {
    match fs::remove_file(path) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(LaunchError::runtime_file(
            RuntimeFileAction::RemoveStale,
            path,
        )(error)),
        _ => Ok(()),
    }
}

fn process_alive(pid: u32) -> Result<bool, LaunchError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(LaunchError::ProbeProcess { pid, source: errno }),
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn runtime() -> (TempDir, RuntimePaths) {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = RuntimePaths::in_directory(dir.path().to_path_buf()).expect("runtime paths");
        (dir, paths)
    }

    #[rstest]
    fn second_guard_is_refused_while_first_is_alive(runtime: (TempDir, RuntimePaths)) {
        let (_dir, paths) = runtime;
        let mut first = ProcessGuard::acquire(paths.clone()).expect("first guard");
        first.write_pid(std::process::id()).expect("write pid");

        let error = ProcessGuard::acquire(paths).expect_err("second guard should fail");
        assert!(matches!(error, LaunchError::AlreadyRunning { pid } if pid == std::process::id()));
    }

    #[rstest]
    fn stale_lock_without_pid_is_reclaimed(runtime: (TempDir, RuntimePaths)) {
        let (_dir, paths) = runtime;
        fs::write(paths.lock_path(), b"").expect("stale lock");
        let guard = ProcessGuard::acquire(paths.clone()).expect("reclaimed guard");
        drop(guard);
        assert!(!paths.lock_path().exists(), "lock removed on drop");
    }

    #[rstest]
    fn health_snapshot_records_status(runtime: (TempDir, RuntimePaths)) {
        let (_dir, paths) = runtime;
        let mut guard = ProcessGuard::acquire(paths.clone()).expect("guard");
        assert!(matches!(
            guard.write_health(HealthState::Starting),
            Err(LaunchError::MissingPid)
        ));
        guard.write_pid(42).expect("pid");
        guard.write_health(HealthState::Ready).expect("health");

        let snapshot: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(paths.health_path()).expect("read health"))
                .expect("health json");
        assert_eq!(snapshot["status"], "ready");
        assert_eq!(snapshot["pid"], 42);
    }
}
