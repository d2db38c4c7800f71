//! Identifier filters fed by the receive thread.
//!
//! Observers register against an exact frame identifier and receive every
//! matching frame until their [`FilterRegistration`] is dropped. Dropping the
//! registration is the only way to remove a filter, so no exit path of a
//! waiting command can leave one behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::time::Duration;

use super::ObservedFrame;

/// Receives frames matching a registered identifier.
pub trait FrameObserver: Send + Sync {
    /// Called on the receive thread for each matching frame.
    fn observe(&self, frame: &ObservedFrame);
}

/// Active identifier filters; one observer per identifier.
#[derive(Default)]
pub struct FilterTable {
    observers: Mutex<HashMap<u32, Arc<dyn FrameObserver>>>,
}

impl FilterTable {
    /// Registers `observer` for frames with identifier `id`, replacing any
    /// observer already registered for it.
    #[must_use]
    pub fn register(self: &Arc<Self>, id: u32, observer: Arc<dyn FrameObserver>) -> FilterRegistration {
        self.lock().insert(id, Arc::clone(&observer));
        FilterRegistration {
            table: Arc::clone(self),
            id,
            observer,
        }
    }

    /// Delivers `frame` to the observer of its identifier.
    pub fn notify(&self, frame: &ObservedFrame) {
        let Some(observer) = self.lock().get(&frame.frame.id()).cloned() else {
            return;
        };
        // The observer runs outside the lock so it may deregister itself.
        observer.observe(frame);
    }

    /// Number of identifiers with a registered observer.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Removes the filter for `id` unless another observer has replaced
    /// `observer` since.
    fn remove(&self, id: u32, observer: &Arc<dyn FrameObserver>) {
        let mut observers = self.lock();
        if observers
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, observer))
        {
            observers.remove(&id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Arc<dyn FrameObserver>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a filter registered; dropping it deregisters the observer.
pub struct FilterRegistration {
    table: Arc<FilterTable>,
    id: u32,
    observer: Arc<dyn FrameObserver>,
}

impl Drop for FilterRegistration {
    fn drop(&mut self) {
        self.table.remove(self.id, &self.observer);
    }
}

struct FirstFrame {
    slot: mpsc::SyncSender<ObservedFrame>,
}

impl FrameObserver for FirstFrame {
    fn observe(&self, frame: &ObservedFrame) {
        // Only the first match is kept; later frames find the slot full.
        self.slot.try_send(frame.clone()).ok();
    }
}

/// Blocks until a frame with identifier `id` arrives or `timeout` elapses.
///
/// The filter is registered before waiting and removed on every exit path.
pub(crate) fn await_frame(
    filters: &Arc<FilterTable>,
    id: u32,
    timeout: Duration,
) -> Option<ObservedFrame> {
    let (slot, receiver) = mpsc::sync_channel(1);
    let _registration = filters.register(id, Arc::new(FirstFrame { slot }));
    receiver.recv_timeout(timeout).ok()
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::bus::CanFrame;

    fn observed(id: u32, data: &[u8]) -> ObservedFrame {
        ObservedFrame::now(CanFrame::new(id, data.to_vec()).expect("frame"))
    }

    #[test]
    fn registration_drop_removes_filter() {
        let table = Arc::new(FilterTable::default());
        let (slot, _receiver) = mpsc::sync_channel(1);
        let registration = table.register(0x1AF, Arc::new(FirstFrame { slot }));
        assert_eq!(table.active_count(), 1);
        drop(registration);
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn registering_twice_replaces_the_observer() {
        let table = Arc::new(FilterTable::default());
        let (first_slot, first) = mpsc::sync_channel(1);
        let (second_slot, second) = mpsc::sync_channel(1);
        let replaced = table.register(0x1AF, Arc::new(FirstFrame { slot: first_slot }));
        let current = table.register(0x1AF, Arc::new(FirstFrame { slot: second_slot }));
        assert_eq!(table.active_count(), 1);

        table.notify(&observed(0x1AF, &[7]));
        assert!(first.try_recv().is_err());
        assert_eq!(second.try_recv().expect("frame").frame.data(), &[7]);

        // The stale registration must not remove its replacement.
        drop(replaced);
        assert_eq!(table.active_count(), 1);
        drop(current);
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn wait_returns_within_its_timeout() {
        let table = Arc::new(FilterTable::default());
        let timeout = Duration::from_millis(200);
        let started = Instant::now();
        assert!(await_frame(&table, 0x1AF, timeout).is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout, "returned early after {elapsed:?}");
        assert!(
            elapsed < timeout + Duration::from_millis(100),
            "overran the timeout: {elapsed:?}"
        );
    }

    #[test]
    fn wait_returns_first_matching_frame() {
        let table = Arc::new(FilterTable::default());
        let feeder = Arc::clone(&table);
        let handle = thread::spawn(move || {
            // Keep notifying until the waiter has registered.
            for _ in 0..200 {
                feeder.notify(&observed(0x080, &[]));
                feeder.notify(&observed(0x181, &[1, 2]));
                thread::sleep(Duration::from_millis(5));
            }
        });
        let frame = await_frame(&table, 0x181, Duration::from_secs(2)).expect("frame observed");
        assert_eq!(frame.frame.data(), &[1, 2]);
        assert_eq!(table.active_count(), 0);
        handle.join().expect("feeder thread");
    }

    #[test]
    fn wait_times_out_without_leaking_filters() {
        let table = Arc::new(FilterTable::default());
        for _ in 0..5 {
            assert!(await_frame(&table, 0x1AF, Duration::from_millis(10)).is_none());
        }
        assert_eq!(table.active_count(), 0);
    }
}
