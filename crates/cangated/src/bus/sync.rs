//! Periodic timing pulse (SYNC) producer.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::{BUS_TARGET, CanFrame, CanInterface};

/// Identifier of the timing pulse.
pub(crate) const SYNC_ID: u32 = 0x080;

struct Running {
    period: Duration,
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns at most one pulse thread.
#[derive(Default)]
pub(super) struct SyncProducer {
    running: Option<Running>,
}

impl SyncProducer {
    /// Starts pulsing every `period`, replacing any running producer. The
    /// first pulse is sent immediately.
    pub(super) fn start(
        &mut self,
        interface: Arc<dyn CanInterface>,
        period: Duration,
    ) -> std::io::Result<()> {
        self.stop();
        let (stop, stopped) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("cangate-sync".to_owned())
            .spawn(move || pulse(interface.as_ref(), period, &stopped))?;
        self.running = Some(Running {
            period,
            stop,
            handle,
        });
        debug!(target: BUS_TARGET, period_ms = period.as_millis(), "timing pulse started");
        Ok(())
    }

    /// Stops the producer. Returns `false` when none was running.
    pub(super) fn stop(&mut self) -> bool {
        let Some(running) = self.running.take() else {
            return false;
        };
        // The thread may already have exited after a send failure.
        running.stop.send(()).ok();
        if running.handle.join().is_err() {
            warn!(target: BUS_TARGET, "timing pulse thread panicked");
        }
        debug!(target: BUS_TARGET, "timing pulse stopped");
        true
    }

    /// Period of the running producer.
    pub(super) fn period(&self) -> Option<Duration> {
        self.running.as_ref().map(|running| running.period)
    }
}

impl Drop for SyncProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pulse(interface: &dyn CanInterface, period: Duration, stopped: &mpsc::Receiver<()>) {
    let frame = CanFrame::from_parts(SYNC_ID, &[]);
    loop {
        if let Err(error) = interface.send(&frame) {
            warn!(target: BUS_TARGET, %error, "timing pulse could not be sent");
        }
        match stopped.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::bus::VirtualBus;

    fn count_pulses(receiver: &dyn CanInterface, window: Duration) -> usize {
        let deadline = Instant::now() + window;
        let mut pulses = 0;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match receiver.recv_timeout(remaining) {
                Ok(Some(frame)) if frame.id() == SYNC_ID => pulses += 1,
                Ok(_) => {}
                Err(error) => panic!("receive failed: {error}"),
            }
        }
        pulses
    }

    #[test]
    fn restart_replaces_the_period() {
        let bus = VirtualBus::named("sync-restart");
        let observer = bus.connect();
        let mut producer = SyncProducer::default();

        producer
            .start(Arc::new(bus.connect()), Duration::from_millis(40))
            .expect("start");
        producer
            .start(Arc::new(bus.connect()), Duration::from_millis(10))
            .expect("restart");
        assert_eq!(producer.period(), Some(Duration::from_millis(10)));

        let pulses = count_pulses(&observer, Duration::from_millis(200));
        assert!(pulses >= 8, "expected the faster period, saw {pulses} pulses");

        assert!(producer.stop());
        assert!(!producer.stop());
        assert_eq!(producer.period(), None);
    }
}
