//! Background receive thread and frame routing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::emcy::EmergencyStore;
use super::scan::NodeTracker;
use super::sdo::RESPONSE_BASE;
use super::{BUS_TARGET, CanFrame, CanInterface, EMCY_BASE, FilterTable, NodeId, ObservedFrame};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Fans received frames out to the session's consumers.
pub(super) struct FrameRouter {
    pub(super) filters: Arc<FilterTable>,
    pub(super) emergencies: EmergencyStore,
    pub(super) tracker: NodeTracker,
    transfers: mpsc::Sender<CanFrame>,
}

impl FrameRouter {
    /// Creates a router and the receiver for object transfer responses.
    pub(super) fn new() -> (Self, mpsc::Receiver<CanFrame>) {
        let (transfers, responses) = mpsc::channel();
        let router = Self {
            filters: Arc::new(FilterTable::default()),
            emergencies: EmergencyStore::default(),
            tracker: NodeTracker::default(),
            transfers,
        };
        (router, responses)
    }

    pub(super) fn route(&self, observed: &ObservedFrame) {
        let id = observed.frame.id();
        self.tracker.observe(id);
        if is_node_addressed(id, RESPONSE_BASE) {
            // The session may have been dropped mid-shutdown.
            self.transfers.send(observed.frame.clone()).ok();
        }
        if is_node_addressed(id, EMCY_BASE)
            && let Some(node) = NodeId::from_cob_id(id)
        {
            self.emergencies.record(node, observed);
        }
        self.filters.notify(observed);
    }
}

fn is_node_addressed(id: u32, base: u32) -> bool {
    id > base && id <= base + 0x7F
}

/// Handle to the receive thread; stopping joins it.
pub(super) struct ReceiveLoop {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReceiveLoop {
    pub(super) fn spawn(
        interface: Arc<dyn CanInterface>,
        router: Arc<FrameRouter>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("cangate-bus-rx".to_owned())
            .spawn(move || receive(interface.as_ref(), &router, &flag))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub(super) fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!(target: BUS_TARGET, "receive thread panicked");
        }
    }
}

impl Drop for ReceiveLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive(interface: &dyn CanInterface, router: &FrameRouter, stop: &AtomicBool) {
    let mut failing = false;
    while !stop.load(Ordering::SeqCst) {
        match interface.recv_timeout(POLL_INTERVAL) {
            Ok(Some(frame)) => {
                failing = false;
                router.route(&ObservedFrame::now(frame));
            }
            Ok(None) => failing = false,
            Err(error) => {
                if !failing {
                    warn!(
                        target: BUS_TARGET,
                        channel = interface.channel(),
                        %error,
                        "bus receive failed"
                    );
                }
                failing = true;
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    debug!(target: BUS_TARGET, channel = interface.channel(), "receive thread stopped");
}
