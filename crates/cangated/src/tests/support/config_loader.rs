//! Configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::Utf8PathBuf;
use cangate_config::{BusAdapter, Config, SimulatedNodes, SocketEndpoint};
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use crate::bootstrap::ConfigLoader;

static CHANNELS: AtomicUsize = AtomicUsize::new(0);

/// Loader that places the socket in a temporary directory and attaches the
/// gateway to a private virtual bus.
#[derive(Clone)]
pub struct TestConfigLoader {
    dir: Arc<TempDir>,
    channel: String,
    simulated: SimulatedNodes,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary socket directory");
        let channel = format!("behaviour-{}", CHANNELS.fetch_add(1, Ordering::SeqCst));
        Self {
            dir: Arc::new(dir),
            channel,
            simulated: SimulatedNodes::default(),
        }
    }

    /// Declares simulated peers, for example `"3"`.
    #[must_use]
    pub fn with_simulated_nodes(mut self, nodes: &str) -> Self {
        self.simulated = nodes.parse().expect("simulated node list should parse");
        self
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.path().join("cangated.sock")
    }

    pub fn runtime_dir(&self) -> &Path {
        self.dir.path()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let socket = Utf8PathBuf::from_path_buf(self.socket_path())
            .expect("temporary socket path was not valid UTF-8");
        Ok(Config {
            daemon_socket: SocketEndpoint::unix(socket),
            bus_adapter: BusAdapter::Virtual,
            bus_channel: self.channel.clone(),
            schema_dir: Utf8PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/resources")),
            sdo_timeout_ms: 500,
            scan_window_ms: 200,
            simulated_nodes: self.simulated.clone(),
            ..Config::default()
        })
    }
}

/// Loader that fails by passing an unsupported socket URL.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("cangated"),
            OsString::from("--daemon-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}
