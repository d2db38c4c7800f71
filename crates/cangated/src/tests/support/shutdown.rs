//! Shutdown signal double driven only by the shutdown channel.

use std::sync::{Arc, Mutex};

use signal_hook::consts::signal::SIGTERM;

use crate::process::{
    ShutdownError, ShutdownReason, ShutdownRequests, ShutdownSignal, ShutdownTrigger,
};

/// Waits for `turn_off` or for [`ChannelShutdownSignal::trigger`]; never
/// installs process signal handlers.
#[derive(Clone, Default)]
pub struct ChannelShutdownSignal {
    trigger: Arc<Mutex<Option<ShutdownTrigger>>>,
}

impl ChannelShutdownSignal {
    /// Requests shutdown as if a termination signal had arrived. Returns
    /// `false` when the daemon has not reached the wait yet.
    pub fn trigger(&self) -> bool {
        let slot = self.trigger.lock().expect("shutdown trigger mutex poisoned");
        slot.as_ref()
            .map(|trigger| trigger.request(ShutdownReason::Signal(SIGTERM)))
            .is_some()
    }
}

impl ShutdownSignal for ChannelShutdownSignal {
    fn wait(
        &self,
        trigger: &ShutdownTrigger,
        requests: &ShutdownRequests,
    ) -> Result<ShutdownReason, ShutdownError> {
        *self.trigger.lock().expect("shutdown trigger mutex poisoned") = Some(trigger.clone());
        requests.wait()
    }
}
