//! Linux SocketCAN adapter.
//!
//! The kernel interface must already be configured and up; the configured
//! bitrate is informational here.

use std::io;
use std::time::Duration;

use socketcan::{CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId};

use super::CanInterface;
use crate::bus::CanFrame;

pub(super) struct SocketCanInterface {
    channel: String,
    socket: CanSocket,
}

impl SocketCanInterface {
    pub(super) fn open(channel: &str) -> io::Result<Self> {
        let socket = CanSocket::open(channel)?;
        Ok(Self {
            channel: channel.to_owned(),
            socket,
        })
    }
}

impl CanInterface for SocketCanInterface {
    fn send(&self, frame: &CanFrame) -> io::Result<()> {
        let id: Id = if frame.is_extended() {
            ExtendedId::new(frame.id()).map(Id::Extended)
        } else {
            u16::try_from(frame.id())
                .ok()
                .and_then(StandardId::new)
                .map(Id::Standard)
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid frame identifier"))?;
        let outgoing = socketcan::CanFrame::new(id, frame.data())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid frame payload"))?;
        self.socket.write_frame(&outgoing)
    }

    fn recv_timeout(&self, timeout: Duration) -> io::Result<Option<CanFrame>> {
        self.socket.set_read_timeout(timeout)?;
        match self.socket.read_frame() {
            Ok(socketcan::CanFrame::Data(frame)) => {
                let id = match frame.id() {
                    Id::Standard(id) => u32::from(id.as_raw()),
                    Id::Extended(id) => id.as_raw(),
                };
                Ok(Some(CanFrame::from_parts(id, frame.data())))
            }
            // Remote and error frames carry no data the gateway consumes.
            Ok(_) => Ok(None),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    fn channel(&self) -> &str {
        &self.channel
    }
}
