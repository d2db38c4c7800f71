//! Shared access to the gateway.
//!
//! Every client connection dispatches through one [`GatewayManager`]. The
//! lock is held for the whole request/reply cycle, so commands from
//! different connections never interleave on the bus.

use std::sync::{Arc, Mutex};

use super::errors::DispatchError;
use super::gateway::Gateway;

/// Cloneable handle serialising access to the [`Gateway`].
#[derive(Clone)]
pub struct GatewayManager {
    inner: Arc<Mutex<Gateway>>,
}

impl GatewayManager {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            inner: Arc::new(Mutex::new(gateway)),
        }
    }

    /// Executes a closure with exclusive access to the gateway.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Internal` if the gateway lock is poisoned.
    pub fn with_gateway<F, R>(&self, f: F) -> Result<R, DispatchError>
    where
        F: FnOnce(&mut Gateway) -> R,
    {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| DispatchError::internal("gateway lock poisoned"))?;
        Ok(f(&mut guard))
    }
}
