//! Client side of expedited and segmented object transfers.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{
    AbortCode, EXPEDITED_DATA, REQUEST_BASE, RESPONSE_BASE, SEGMENT_DATA, block, command,
    describe_abort, initiate_payload, multiplexer, trailing_u32, unused_bytes,
};
use crate::bus::{BUS_TARGET, BusError, CanFrame, CanInterface, NodeId, TransferMode};

/// The object a transfer addresses, plus a label for error messages.
#[derive(Debug, Clone, Copy)]
pub(super) struct Transfer {
    pub(super) index: u16,
    pub(super) subindex: u8,
    pub(super) operation: &'static str,
}

/// Performs transfers against one node over a shared response channel.
pub(crate) struct SdoClient<'a> {
    interface: &'a dyn CanInterface,
    responses: &'a mpsc::Receiver<CanFrame>,
    node: NodeId,
    timeout: Duration,
}

impl<'a> SdoClient<'a> {
    pub(crate) fn new(
        interface: &'a dyn CanInterface,
        responses: &'a mpsc::Receiver<CanFrame>,
        node: NodeId,
        timeout: Duration,
    ) -> Self {
        Self {
            interface,
            responses,
            node,
            timeout,
        }
    }

    /// Reads `index:subindex` from the node.
    pub(crate) fn upload(
        &self,
        index: u16,
        subindex: u8,
        mode: TransferMode,
    ) -> Result<Vec<u8>, BusError> {
        let transfer = Transfer {
            index,
            subindex,
            operation: "object read",
        };
        self.discard_stale();
        let data = match mode {
            TransferMode::Block => block::upload(self, transfer)?,
            TransferMode::Expedited | TransferMode::Segmented => self.upload_initiate(transfer)?,
        };
        debug!(
            target: BUS_TARGET,
            node = self.node.get(),
            index,
            subindex,
            mode = mode.as_str(),
            bytes = data.len(),
            "object read"
        );
        Ok(data)
    }

    /// Writes `data` to `index:subindex` on the node.
    pub(crate) fn download(
        &self,
        index: u16,
        subindex: u8,
        mode: TransferMode,
        data: &[u8],
    ) -> Result<(), BusError> {
        let transfer = Transfer {
            index,
            subindex,
            operation: "object write",
        };
        self.discard_stale();
        match mode {
            TransferMode::Expedited => self.download_expedited(transfer, data)?,
            TransferMode::Segmented => self.download_segmented(transfer, data)?,
            TransferMode::Block => block::download(self, transfer, data)?,
        }
        debug!(
            target: BUS_TARGET,
            node = self.node.get(),
            index,
            subindex,
            mode = mode.as_str(),
            bytes = data.len(),
            "object written"
        );
        Ok(())
    }

    fn upload_initiate(&self, transfer: Transfer) -> Result<Vec<u8>, BusError> {
        let request = initiate_payload(
            command::INITIATE_UPLOAD,
            transfer.index,
            transfer.subindex,
            [0; 4],
        );
        self.send(transfer, &request)?;
        let response = self.receive(transfer)?;
        self.expect_specifier(transfer, &response, command::INITIATE_UPLOAD_RESPONSE)?;
        self.expect_multiplexer(transfer, &response)?;

        let flags = response[0];
        if flags & command::EXPEDITED != 0 {
            let unused = if flags & command::SIZE_INDICATED == 0 {
                0
            } else {
                usize::from((flags >> 2) & 0x03)
            };
            return Ok(response
                .iter()
                .skip(4)
                .take(EXPEDITED_DATA - unused)
                .copied()
                .collect());
        }

        // The server chose a segmented transfer, whatever mode was requested.
        let expected = (flags & command::SIZE_INDICATED != 0).then(|| trailing_u32(&response));
        self.upload_segments(transfer, expected)
    }

    fn upload_segments(&self, transfer: Transfer, expected: Option<u32>) -> Result<Vec<u8>, BusError> {
        let mut data = Vec::new();
        let mut toggle = 0;
        loop {
            let request = segment_request(command::UPLOAD_SEGMENT | toggle);
            self.send(transfer, &request)?;
            let response = self.receive(transfer)?;
            self.expect_specifier(transfer, &response, command::UPLOAD_SEGMENT_RESPONSE)?;
            if response[0] & command::TOGGLE != toggle {
                self.abort(transfer, AbortCode::ToggleBit);
                return Err(self.protocol(transfer, "toggle bit not alternated"));
            }
            let unused = usize::from((response[0] >> 1) & 0x07);
            data.extend(response.iter().skip(1).take(SEGMENT_DATA - unused));
            if response[0] & command::NO_MORE_SEGMENTS != 0 {
                break;
            }
            toggle ^= command::TOGGLE;
        }

        if let Some(size) = expected
            && usize::try_from(size).ok() != Some(data.len())
        {
            return Err(self.protocol(
                transfer,
                &format!("announced {size} bytes but delivered {}", data.len()),
            ));
        }
        Ok(data)
    }

    fn download_expedited(&self, transfer: Transfer, data: &[u8]) -> Result<(), BusError> {
        if data.is_empty() || data.len() > EXPEDITED_DATA {
            return Err(BusError::SizeMismatch { len: data.len() });
        }
        let specifier = command::INITIATE_DOWNLOAD
            | command::EXPEDITED
            | command::SIZE_INDICATED
            | (unused_bytes(EXPEDITED_DATA, data.len()) << 2);
        let mut value = [0_u8; 4];
        for (slot, byte) in value.iter_mut().zip(data) {
            *slot = *byte;
        }
        let request = initiate_payload(specifier, transfer.index, transfer.subindex, value);
        self.send(transfer, &request)?;
        let response = self.receive(transfer)?;
        self.expect_specifier(transfer, &response, command::INITIATE_DOWNLOAD_RESPONSE)?;
        self.expect_multiplexer(transfer, &response)
    }

    fn download_segmented(&self, transfer: Transfer, data: &[u8]) -> Result<(), BusError> {
        let size = u32::try_from(data.len()).map_err(|_| BusError::SizeMismatch { len: data.len() })?;
        let request = initiate_payload(
            command::INITIATE_DOWNLOAD | command::SIZE_INDICATED,
            transfer.index,
            transfer.subindex,
            size.to_le_bytes(),
        );
        self.send(transfer, &request)?;
        let response = self.receive(transfer)?;
        self.expect_specifier(transfer, &response, command::INITIATE_DOWNLOAD_RESPONSE)?;
        self.expect_multiplexer(transfer, &response)?;

        let mut toggle = 0;
        let mut chunks = data.chunks(SEGMENT_DATA).peekable();
        // A zero length write still needs one closing segment.
        let empty: &[u8] = &[];
        if chunks.peek().is_none() {
            return self.download_segment(transfer, empty, toggle, true);
        }
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            self.download_segment(transfer, chunk, toggle, last)?;
            toggle ^= command::TOGGLE;
        }
        Ok(())
    }

    fn download_segment(
        &self,
        transfer: Transfer,
        chunk: &[u8],
        toggle: u8,
        last: bool,
    ) -> Result<(), BusError> {
        let unused = unused_bytes(SEGMENT_DATA, chunk.len());
        let header = command::DOWNLOAD_SEGMENT
            | toggle
            | (unused << 1)
            | if last { command::NO_MORE_SEGMENTS } else { 0 };
        self.send(transfer, &segment_payload(header, chunk))?;
        let response = self.receive(transfer)?;
        self.expect_specifier(transfer, &response, command::DOWNLOAD_SEGMENT_RESPONSE)?;
        if response[0] & command::TOGGLE != toggle {
            self.abort(transfer, AbortCode::ToggleBit);
            return Err(self.protocol(transfer, "toggle bit not alternated"));
        }
        Ok(())
    }

    pub(super) fn send(&self, transfer: Transfer, payload: &[u8; 8]) -> Result<(), BusError> {
        let frame = CanFrame::from_parts(REQUEST_BASE + u32::from(self.node.get()), payload);
        self.interface.send(&frame).map_err(|error| {
            debug!(
                target: BUS_TARGET,
                node = self.node.get(),
                index = transfer.index,
                %error,
                "transfer request could not be sent"
            );
            BusError::Io(error)
        })
    }

    /// Waits for the node's next response, translating aborts and timeouts.
    pub(super) fn receive(&self, transfer: Transfer) -> Result<[u8; 8], BusError> {
        let expected_id = RESPONSE_BASE + u32::from(self.node.get());
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = match self.responses.recv_timeout(remaining) {
                Ok(frame) => frame,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    self.abort(transfer, AbortCode::Timeout);
                    return Err(BusError::Timeout {
                        operation: transfer.operation,
                        node: self.node,
                        timeout: self.timeout,
                    });
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(BusError::Closed),
            };
            if frame.id() != expected_id {
                continue;
            }
            let payload = frame.padded();
            if payload[0] == command::ABORT {
                let code = trailing_u32(&payload);
                return Err(BusError::Access {
                    node: self.node,
                    index: transfer.index,
                    subindex: transfer.subindex,
                    code,
                    reason: describe_abort(code),
                });
            }
            return Ok(payload);
        }
    }

    /// Tells the node to abandon the transfer. Failures are only logged; the
    /// caller is already reporting a more specific error.
    pub(super) fn abort(&self, transfer: Transfer, code: AbortCode) {
        let request = initiate_payload(
            command::ABORT,
            transfer.index,
            transfer.subindex,
            code.code().to_le_bytes(),
        );
        if let Err(error) = self.send(transfer, &request) {
            debug!(target: BUS_TARGET, node = self.node.get(), %error, "abort not sent");
        }
    }

    pub(super) fn expect_specifier(
        &self,
        transfer: Transfer,
        payload: &[u8; 8],
        specifier: u8,
    ) -> Result<(), BusError> {
        if payload[0] & command::SPECIFIER_MASK == specifier {
            return Ok(());
        }
        self.abort(transfer, AbortCode::InvalidCommand);
        Err(self.protocol(
            transfer,
            &format!("unexpected command specifier {:#04x}", payload[0]),
        ))
    }

    pub(super) fn expect_multiplexer(&self, transfer: Transfer, payload: &[u8; 8]) -> Result<(), BusError> {
        let (index, subindex) = multiplexer(payload);
        if index == transfer.index && subindex == transfer.subindex {
            return Ok(());
        }
        Err(self.protocol(
            transfer,
            &format!("response addressed {index:#06x}:{subindex}"),
        ))
    }

    pub(super) fn protocol(&self, transfer: Transfer, message: &str) -> BusError {
        BusError::Protocol {
            node: self.node,
            message: format!(
                "{} of {:#06x}:{}: {message}",
                transfer.operation, transfer.index, transfer.subindex
            ),
        }
    }

    fn discard_stale(&self) {
        while self.responses.try_recv().is_ok() {}
    }
}

/// Segment frame with `header` followed by up to seven data bytes.
pub(crate) fn segment_payload(header: u8, chunk: &[u8]) -> [u8; 8] {
    let mut payload = [0_u8; 8];
    payload[0] = header;
    for (slot, byte) in payload.iter_mut().skip(1).zip(chunk) {
        *slot = *byte;
    }
    payload
}

fn segment_request(header: u8) -> [u8; 8] {
    segment_payload(header, &[])
}
