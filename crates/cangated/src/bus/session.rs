//! The bus session seam used by the dispatcher.

use std::collections::BTreeMap;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use cangate_config::BusSettings;
use tracing::{debug, info};

use super::filters::await_frame;
use super::router::{FrameRouter, ReceiveLoop};
use super::sdo::SdoClient;
use super::sync::SyncProducer;
use super::{
    BUS_TARGET, BusError, CanFrame, CanInterface, ErrorStateKind, FaultRecord, FilterTable,
    NmtState, NodeId, ObjectAddress, ObservedFrame, TpdoConfig, TransferMode, nmt, open_interface,
    pdo, scan,
};
use crate::dictionary::{DataType, ObjectDictionary};

/// Operations the gateway performs on the bus.
///
/// Implementations own the bus connection for the lifetime of the daemon.
/// Every method is called while the dispatcher holds exclusive access, so
/// bus operations never interleave.
#[cfg_attr(test, mockall::automock)]
pub trait BusSession: Send {
    /// Registers a node with its object dictionary.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateNode`] when the node is already added.
    fn add_node(&mut self, node: NodeId, dictionary: ObjectDictionary) -> Result<(), BusError>;

    /// Data type the node's dictionary declares for `object`, if any.
    fn data_type(&self, object: ObjectAddress) -> Option<DataType>;

    /// Reads an object from the node.
    ///
    /// # Errors
    ///
    /// Returns transfer, timeout or abort errors from the node.
    fn read_object(
        &mut self,
        object: ObjectAddress,
        mode: TransferMode,
    ) -> Result<Vec<u8>, BusError>;

    /// Writes an object on the node.
    ///
    /// # Errors
    ///
    /// Returns transfer, timeout or abort errors from the node.
    fn write_object(
        &mut self,
        object: ObjectAddress,
        mode: TransferMode,
        data: &[u8],
    ) -> Result<(), BusError>;

    /// Commands a node into a network-management state.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] when the command cannot be sent.
    fn set_node_state(&mut self, node: NodeId, state: NmtState) -> Result<(), BusError>;

    /// Configures and persists a transmit process-data slot.
    ///
    /// # Errors
    ///
    /// Returns transfer errors raised while writing the configuration.
    fn configure_periodic_production(&mut self, config: &TpdoConfig) -> Result<(), BusError>;

    /// Starts, or restarts with a new period, the timing pulse producer.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] when the producer thread cannot start.
    fn start_timing_source(&mut self, period: Duration) -> Result<(), BusError>;

    /// Stops the timing pulse producer. Returns `false` when none ran.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] after the session is closed.
    fn stop_timing_source(&mut self) -> Result<bool, BusError>;

    /// Period of the running timing pulse producer.
    fn timing_period(&self) -> Option<Duration>;

    /// Transmits a raw frame.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] when the frame cannot be sent.
    fn send_raw_frame(&mut self, frame: &CanFrame) -> Result<(), BusError>;

    /// Waits for the first frame with identifier `id`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] after the session is closed.
    fn await_frame(&mut self, id: u32, timeout: Duration)
    -> Result<Option<ObservedFrame>, BusError>;

    /// Probes every address and returns the nodes that answered.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] when probes cannot be sent.
    fn scan(&mut self) -> Result<Vec<NodeId>, BusError>;

    /// Emergency records received from `node`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] after the session is closed.
    fn read_error_state(
        &mut self,
        node: NodeId,
        kind: ErrorStateKind,
    ) -> Result<Vec<FaultRecord>, BusError>;

    /// Number of frame filters currently registered.
    fn active_filter_count(&self) -> usize;

    /// Stops background activity and releases the bus.
    fn close(&mut self);
}

/// Opens bus sessions during bootstrap.
pub trait BusConnector: Send + Sync {
    /// Connects to the bus described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] when the adapter cannot be opened.
    fn connect(&self, settings: &BusSettings) -> Result<Box<dyn BusSession>, BusError>;
}

/// Connects [`CanopenSession`]s through the configured adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct CanopenConnector;

impl BusConnector for CanopenConnector {
    fn connect(&self, settings: &BusSettings) -> Result<Box<dyn BusSession>, BusError> {
        CanopenSession::connect(settings).map(|session| Box::new(session) as Box<dyn BusSession>)
    }
}

/// Timing knobs of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Per-exchange object transfer timeout.
    pub sdo_timeout: Duration,
    /// Discovery settling window.
    pub scan_window: Duration,
}

impl From<&BusSettings> for SessionSettings {
    fn from(settings: &BusSettings) -> Self {
        Self {
            sdo_timeout: settings.sdo_timeout,
            scan_window: settings.scan_window,
        }
    }
}

/// Production [`BusSession`] speaking CANopen over a [`CanInterface`].
pub struct CanopenSession {
    interface: Arc<dyn CanInterface>,
    router: Arc<FrameRouter>,
    receiver: ReceiveLoop,
    responses: mpsc::Receiver<CanFrame>,
    nodes: BTreeMap<NodeId, ObjectDictionary>,
    sync: SyncProducer,
    settings: SessionSettings,
    closed: bool,
}

impl CanopenSession {
    /// Opens the configured adapter and starts receiving.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] when the adapter or receive thread cannot start.
    pub fn connect(settings: &BusSettings) -> Result<Self, BusError> {
        let interface = open_interface(settings)?;
        Self::with_interface(interface, SessionSettings::from(settings))
    }

    /// Starts a session over an already opened interface.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] when the receive thread cannot start.
    pub fn with_interface(
        interface: Arc<dyn CanInterface>,
        settings: SessionSettings,
    ) -> Result<Self, BusError> {
        let (router, responses) = FrameRouter::new();
        let router = Arc::new(router);
        let receiver = ReceiveLoop::spawn(Arc::clone(&interface), Arc::clone(&router))?;
        Ok(Self {
            interface,
            router,
            receiver,
            responses,
            nodes: BTreeMap::new(),
            sync: SyncProducer::default(),
            settings,
            closed: false,
        })
    }

    /// Filter table backing [`BusSession::await_frame`].
    #[must_use]
    pub fn filters(&self) -> &Arc<FilterTable> {
        &self.router.filters
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    fn client(&self, node: NodeId) -> Result<SdoClient<'_>, BusError> {
        self.ensure_open()?;
        if !self.nodes.contains_key(&node) {
            return Err(BusError::UnknownNode { node });
        }
        Ok(SdoClient::new(
            self.interface.as_ref(),
            &self.responses,
            node,
            self.settings.sdo_timeout,
        ))
    }

    fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        self.ensure_open()?;
        self.interface.send(frame).map_err(BusError::Io)
    }
}

impl BusSession for CanopenSession {
    fn add_node(&mut self, node: NodeId, dictionary: ObjectDictionary) -> Result<(), BusError> {
        self.ensure_open()?;
        if self.nodes.contains_key(&node) {
            return Err(BusError::DuplicateNode { node });
        }
        info!(
            target: BUS_TARGET,
            node = node.get(),
            objects = dictionary.len(),
            "node added"
        );
        self.nodes.insert(node, dictionary);
        Ok(())
    }

    fn data_type(&self, object: ObjectAddress) -> Option<DataType> {
        self.nodes
            .get(&object.node)
            .and_then(|dictionary| dictionary.data_type(object.index, object.subindex))
    }

    fn read_object(
        &mut self,
        object: ObjectAddress,
        mode: TransferMode,
    ) -> Result<Vec<u8>, BusError> {
        self.client(object.node)?
            .upload(object.index, object.subindex, mode)
    }

    fn write_object(
        &mut self,
        object: ObjectAddress,
        mode: TransferMode,
        data: &[u8],
    ) -> Result<(), BusError> {
        self.client(object.node)?
            .download(object.index, object.subindex, mode, data)
    }

    fn set_node_state(&mut self, node: NodeId, state: NmtState) -> Result<(), BusError> {
        self.send(&nmt::command_frame(node, state))?;
        debug!(target: BUS_TARGET, node = node.get(), state = state.as_str(), "state commanded");
        Ok(())
    }

    fn configure_periodic_production(&mut self, config: &TpdoConfig) -> Result<(), BusError> {
        let client = self.client(config.node)?;
        pdo::configure(&client, config)?;
        info!(
            target: BUS_TARGET,
            node = config.node.get(),
            slot = config.slot.get(),
            enabled = config.enabled,
            "process data slot configured"
        );
        Ok(())
    }

    fn start_timing_source(&mut self, period: Duration) -> Result<(), BusError> {
        self.ensure_open()?;
        self.sync.start(Arc::clone(&self.interface), period)?;
        Ok(())
    }

    fn stop_timing_source(&mut self) -> Result<bool, BusError> {
        self.ensure_open()?;
        Ok(self.sync.stop())
    }

    fn timing_period(&self) -> Option<Duration> {
        self.sync.period()
    }

    fn send_raw_frame(&mut self, frame: &CanFrame) -> Result<(), BusError> {
        self.send(frame)
    }

    fn await_frame(
        &mut self,
        id: u32,
        timeout: Duration,
    ) -> Result<Option<ObservedFrame>, BusError> {
        self.ensure_open()?;
        Ok(await_frame(&self.router.filters, id, timeout))
    }

    fn scan(&mut self) -> Result<Vec<NodeId>, BusError> {
        self.ensure_open()?;
        self.router.tracker.reset();
        for probe in scan::probe_frames() {
            self.interface.send(&probe)?;
        }
        thread::sleep(self.settings.scan_window);
        // Probe replies are not part of any transfer.
        while self.responses.try_recv().is_ok() {}
        let nodes = self.router.tracker.nodes();
        info!(target: BUS_TARGET, found = nodes.len(), "discovery finished");
        Ok(nodes)
    }

    fn read_error_state(
        &mut self,
        node: NodeId,
        kind: ErrorStateKind,
    ) -> Result<Vec<FaultRecord>, BusError> {
        self.ensure_open()?;
        Ok(self.router.emergencies.snapshot(node, kind))
    }

    fn active_filter_count(&self) -> usize {
        self.router.filters.active_count()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sync.stop();
        self.router.filters.clear();
        self.receiver.stop();
        info!(target: BUS_TARGET, channel = self.interface.channel(), "bus session closed");
    }
}

impl Drop for CanopenSession {
    fn drop(&mut self) {
        self.close();
    }
}
