//! In-process bus shared by every interface opened on the same channel name.
//!
//! A frame sent through one interface is delivered to every other interface
//! on the channel, never back to its sender, matching SocketCAN defaults.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::time::Duration;

use once_cell::sync::Lazy;

use super::CanInterface;
use crate::bus::CanFrame;

static CHANNELS: Lazy<Mutex<HashMap<String, VirtualBus>>> = Lazy::new(Mutex::default);

#[derive(Default)]
struct Peers {
    next_id: u64,
    senders: Vec<(u64, mpsc::Sender<CanFrame>)>,
}

/// A named in-process bus.
#[derive(Clone)]
pub struct VirtualBus {
    channel: Arc<str>,
    peers: Arc<Mutex<Peers>>,
}

impl VirtualBus {
    /// Returns the process-wide bus registered under `channel`, creating it
    /// on first use.
    #[must_use]
    pub fn named(channel: &str) -> Self {
        let mut channels = CHANNELS.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_owned())
            .or_insert_with(|| Self {
                channel: Arc::from(channel),
                peers: Arc::default(),
            })
            .clone()
    }

    /// Attaches a new interface to the bus.
    #[must_use]
    pub fn connect(&self) -> VirtualInterface {
        let (sender, receiver) = mpsc::channel();
        let mut peers = self.peers();
        let id = peers.next_id;
        peers.next_id += 1;
        peers.senders.push((id, sender));
        VirtualInterface {
            id,
            bus: self.clone(),
            receiver: Mutex::new(receiver),
        }
    }

    fn broadcast(&self, from: u64, frame: &CanFrame) {
        let mut peers = self.peers();
        peers.senders.retain(|(id, sender)| {
            *id == from || sender.send(frame.clone()).is_ok()
        });
    }

    fn detach(&self, id: u64) {
        self.peers().senders.retain(|(peer, _)| *peer != id);
    }

    fn peers(&self) -> MutexGuard<'_, Peers> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One attachment to a [`VirtualBus`].
pub struct VirtualInterface {
    id: u64,
    bus: VirtualBus,
    receiver: Mutex<mpsc::Receiver<CanFrame>>,
}

impl CanInterface for VirtualInterface {
    fn send(&self, frame: &CanFrame) -> io::Result<()> {
        self.bus.broadcast(self.id, frame);
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> io::Result<Option<CanFrame>> {
        let receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        match receiver.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "virtual interface detached",
            )),
        }
    }

    fn channel(&self) -> &str {
        &self.bus.channel
    }
}

impl Drop for VirtualInterface {
    fn drop(&mut self) {
        self.bus.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u32) -> CanFrame {
        CanFrame::new(id, vec![1, 2, 3]).expect("frame")
    }

    #[test]
    fn peers_receive_frames_but_sender_does_not() {
        let bus = VirtualBus::named("vbus-peers");
        let first = bus.connect();
        let second = bus.connect();

        first.send(&frame(0x123)).expect("send");

        let received = second
            .recv_timeout(Duration::from_millis(200))
            .expect("receive");
        assert_eq!(received, Some(frame(0x123)));
        let echoed = first.recv_timeout(Duration::from_millis(20)).expect("receive");
        assert_eq!(echoed, None);
    }

    #[test]
    fn channels_are_isolated_by_name() {
        let left = VirtualBus::named("vbus-left").connect();
        let right = VirtualBus::named("vbus-right").connect();
        left.send(&frame(0x321)).expect("send");
        let received = right.recv_timeout(Duration::from_millis(20)).expect("receive");
        assert_eq!(received, None);
    }

    #[test]
    fn same_name_shares_the_bus() {
        let sender = VirtualBus::named("vbus-shared").connect();
        let receiver = VirtualBus::named("vbus-shared").connect();
        sender.send(&frame(0x7E5)).expect("send");
        assert_eq!(
            receiver
                .recv_timeout(Duration::from_millis(200))
                .expect("receive")
                .map(|frame| frame.id()),
            Some(0x7E5)
        );
        assert_eq!(receiver.channel(), "vbus-shared");
    }
}
