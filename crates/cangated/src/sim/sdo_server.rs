//! Server side of object transfers for simulated nodes.
//!
//! The server is a state machine fed one request payload at a time. Each
//! step yields the response payloads to transmit; block uploads answer a
//! single request with a whole sub-block of segments.

use crate::bus::sdo::{
    AbortCode, EXPEDITED_DATA, MAX_BLOCK_SIZE, SEGMENT_DATA, command, crc16, initiate_payload,
    multiplexer, segment_payload, trailing_u32, unused_bytes,
};

/// Segments the server accepts per block download sub-block.
pub(super) const SERVER_BLOCK_SIZE: u8 = 16;

/// Object storage behind the server.
pub(super) trait ObjectStore {
    /// Current value of `index:subindex`.
    fn read(&mut self, index: u16, subindex: u8) -> Result<Vec<u8>, AbortCode>;

    /// Replaces the value of `index:subindex`.
    fn write(&mut self, index: u16, subindex: u8, data: &[u8]) -> Result<(), AbortCode>;
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Downloading {
        index: u16,
        subindex: u8,
        toggle: u8,
        data: Vec<u8>,
        expected: Option<usize>,
    },
    Uploading {
        index: u16,
        subindex: u8,
        toggle: u8,
        data: Vec<u8>,
        offset: usize,
    },
    BlockDownloading {
        index: u16,
        subindex: u8,
        crc: bool,
        sequence: u8,
        data: Vec<u8>,
        expected: Option<usize>,
    },
    BlockDownloadEnding {
        index: u16,
        subindex: u8,
        crc: bool,
        data: Vec<u8>,
        expected: Option<usize>,
    },
    BlockUploadReady {
        index: u16,
        subindex: u8,
        crc: bool,
        data: Vec<u8>,
        block_size: u8,
    },
    BlockUploading {
        index: u16,
        subindex: u8,
        crc: bool,
        data: Vec<u8>,
        acknowledged: usize,
        block_size: u8,
    },
    BlockUploadEnding,
}

struct Abort {
    index: u16,
    subindex: u8,
    code: AbortCode,
}

type Step = (State, Vec<[u8; 8]>);

/// One node's transfer server.
#[derive(Debug, Default)]
pub(super) struct SdoServer {
    state: State,
}

impl SdoServer {
    /// Handles one request and returns the responses to send.
    pub(super) fn handle(&mut self, request: &[u8; 8], store: &mut dyn ObjectStore) -> Vec<[u8; 8]> {
        if request[0] == command::ABORT {
            self.state = State::Idle;
            return Vec::new();
        }
        let state = std::mem::take(&mut self.state);
        match step(state, request, store) {
            Ok((next, responses)) => {
                self.state = next;
                responses
            }
            Err(abort) => vec![initiate_payload(
                command::ABORT,
                abort.index,
                abort.subindex,
                abort.code.code().to_le_bytes(),
            )],
        }
    }

    /// Drops any transfer in progress.
    pub(super) fn reset(&mut self) {
        self.state = State::Idle;
    }
}

fn step(state: State, request: &[u8; 8], store: &mut dyn ObjectStore) -> Result<Step, Abort> {
    let specifier = request[0] & command::SPECIFIER_MASK;
    match state {
        State::BlockDownloading {
            index,
            subindex,
            crc,
            sequence,
            data,
            expected,
        } => Ok(block_download_segment(
            request, index, subindex, crc, sequence, data, expected,
        )),
        State::Downloading {
            index,
            subindex,
            toggle,
            data,
            expected,
        } if specifier == command::DOWNLOAD_SEGMENT => {
            download_segment(request, store, index, subindex, toggle, data, expected)
        }
        State::Uploading {
            index,
            subindex,
            toggle,
            data,
            offset,
        } if specifier == command::UPLOAD_SEGMENT => {
            upload_segment(request, index, subindex, toggle, data, offset)
        }
        State::BlockDownloadEnding {
            index,
            subindex,
            crc,
            data,
            expected,
        } if specifier == command::BLOCK_DOWNLOAD && request[0] & command::BLOCK_END != 0 => {
            block_download_end(request, store, index, subindex, crc, data, expected)
        }
        State::BlockUploadReady {
            index,
            subindex,
            crc,
            data,
            block_size,
        } if request[0] == command::BLOCK_UPLOAD | command::BLOCK_START => {
            let segments = block_segments(&data, 0, block_size);
            Ok((
                State::BlockUploading {
                    index,
                    subindex,
                    crc,
                    data,
                    acknowledged: 0,
                    block_size,
                },
                segments,
            ))
        }
        State::BlockUploading {
            index,
            subindex,
            crc,
            data,
            acknowledged,
            ..
        } if request[0] == command::BLOCK_UPLOAD | command::BLOCK_ACK => {
            block_upload_ack(request, index, subindex, crc, data, acknowledged)
        }
        State::BlockUploadEnding if request[0] == command::BLOCK_UPLOAD | command::BLOCK_END => {
            Ok((State::Idle, Vec::new()))
        }
        _ => initiate(request, store),
    }
}

fn initiate(request: &[u8; 8], store: &mut dyn ObjectStore) -> Result<Step, Abort> {
    let (index, subindex) = multiplexer(request);
    let fail = |code| Abort {
        index,
        subindex,
        code,
    };
    let flags = request[0];
    match flags & command::SPECIFIER_MASK {
        command::INITIATE_DOWNLOAD => {
            let response = initiate_payload(command::INITIATE_DOWNLOAD_RESPONSE, index, subindex, [0; 4]);
            if flags & command::EXPEDITED != 0 {
                let unused = if flags & command::SIZE_INDICATED == 0 {
                    0
                } else {
                    usize::from((flags >> 2) & 0x03)
                };
                let value = request.get(4..8 - unused).unwrap_or_default();
                store.write(index, subindex, value).map_err(fail)?;
                return Ok((State::Idle, vec![response]));
            }
            Ok((
                State::Downloading {
                    index,
                    subindex,
                    toggle: 0,
                    data: Vec::new(),
                    expected: announced_size(request),
                },
                vec![response],
            ))
        }
        command::INITIATE_UPLOAD => {
            let data = store.read(index, subindex).map_err(fail)?;
            if (1..=EXPEDITED_DATA).contains(&data.len()) {
                let unused = unused_bytes(EXPEDITED_DATA, data.len());
                let specifier = command::INITIATE_UPLOAD_RESPONSE
                    | command::EXPEDITED
                    | command::SIZE_INDICATED
                    | (unused << 2);
                let mut value = [0_u8; 4];
                for (slot, byte) in value.iter_mut().zip(&data) {
                    *slot = *byte;
                }
                return Ok((State::Idle, vec![initiate_payload(specifier, index, subindex, value)]));
            }
            let size = u32::try_from(data.len()).map_err(|_| fail(AbortCode::General))?;
            let response = initiate_payload(
                command::INITIATE_UPLOAD_RESPONSE | command::SIZE_INDICATED,
                index,
                subindex,
                size.to_le_bytes(),
            );
            Ok((
                State::Uploading {
                    index,
                    subindex,
                    toggle: 0,
                    data,
                    offset: 0,
                },
                vec![response],
            ))
        }
        command::BLOCK_DOWNLOAD if flags & command::BLOCK_END == command::BLOCK_INITIATE => {
            // Block initiation flags the size in bit 1.
            let expected = (flags & command::EXPEDITED != 0)
                .then(|| usize::try_from(trailing_u32(request)).ok())
                .flatten();
            let response = initiate_payload(
                command::BLOCK_DOWNLOAD_RESPONSE | command::CRC_SUPPORTED | command::BLOCK_INITIATE,
                index,
                subindex,
                [SERVER_BLOCK_SIZE, 0, 0, 0],
            );
            Ok((
                State::BlockDownloading {
                    index,
                    subindex,
                    crc: flags & command::CRC_SUPPORTED != 0,
                    sequence: 0,
                    data: Vec::new(),
                    expected,
                },
                vec![response],
            ))
        }
        command::BLOCK_UPLOAD
            if flags & command::BLOCK_SUBCOMMAND_MASK == command::BLOCK_INITIATE =>
        {
            let block_size = request[4];
            if !(1..=MAX_BLOCK_SIZE).contains(&block_size) {
                return Err(fail(AbortCode::InvalidBlockSize));
            }
            let data = store.read(index, subindex).map_err(fail)?;
            let size = u32::try_from(data.len()).map_err(|_| fail(AbortCode::General))?;
            let response = initiate_payload(
                command::BLOCK_UPLOAD_RESPONSE
                    | command::CRC_SUPPORTED
                    | command::EXPEDITED
                    | command::BLOCK_INITIATE,
                index,
                subindex,
                size.to_le_bytes(),
            );
            Ok((
                State::BlockUploadReady {
                    index,
                    subindex,
                    crc: flags & command::CRC_SUPPORTED != 0,
                    data,
                    block_size,
                },
                vec![response],
            ))
        }
        _ => Err(fail(AbortCode::InvalidCommand)),
    }
}

fn download_segment(
    request: &[u8; 8],
    store: &mut dyn ObjectStore,
    index: u16,
    subindex: u8,
    toggle: u8,
    mut data: Vec<u8>,
    expected: Option<usize>,
) -> Result<Step, Abort> {
    let fail = |code| Abort {
        index,
        subindex,
        code,
    };
    let flags = request[0];
    if flags & command::TOGGLE != toggle {
        return Err(fail(AbortCode::ToggleBit));
    }
    let unused = usize::from((flags >> 1) & 0x07);
    data.extend(request.iter().skip(1).take(SEGMENT_DATA.saturating_sub(unused)));
    let response = segment_payload(command::DOWNLOAD_SEGMENT_RESPONSE | toggle, &[]);
    if flags & command::NO_MORE_SEGMENTS == 0 {
        return Ok((
            State::Downloading {
                index,
                subindex,
                toggle: toggle ^ command::TOGGLE,
                data,
                expected,
            },
            vec![response],
        ));
    }
    if expected.is_some_and(|size| size != data.len()) {
        return Err(fail(AbortCode::LengthMismatch));
    }
    store.write(index, subindex, &data).map_err(fail)?;
    Ok((State::Idle, vec![response]))
}

fn upload_segment(
    request: &[u8; 8],
    index: u16,
    subindex: u8,
    toggle: u8,
    data: Vec<u8>,
    offset: usize,
) -> Result<Step, Abort> {
    if request[0] & command::TOGGLE != toggle {
        return Err(Abort {
            index,
            subindex,
            code: AbortCode::ToggleBit,
        });
    }
    let end = (offset + SEGMENT_DATA).min(data.len());
    let chunk = data.get(offset..end).unwrap_or_default();
    let last = end == data.len();
    let unused = unused_bytes(SEGMENT_DATA, chunk.len());
    let header = command::UPLOAD_SEGMENT_RESPONSE
        | toggle
        | (unused << 1)
        | if last { command::NO_MORE_SEGMENTS } else { 0 };
    let response = segment_payload(header, chunk);
    if last {
        return Ok((State::Idle, vec![response]));
    }
    Ok((
        State::Uploading {
            index,
            subindex,
            toggle: toggle ^ command::TOGGLE,
            data,
            offset: end,
        },
        vec![response],
    ))
}

fn block_download_segment(
    request: &[u8; 8],
    index: u16,
    subindex: u8,
    crc: bool,
    mut sequence: u8,
    mut data: Vec<u8>,
    expected: Option<usize>,
) -> Step {
    let number = request[0] & !command::LAST_BLOCK_SEGMENT;
    let last = request[0] & command::LAST_BLOCK_SEGMENT != 0;
    let in_order = number == sequence + 1;
    if in_order {
        sequence = number;
        data.extend(request.iter().skip(1));
    }
    if !(last || number >= SERVER_BLOCK_SIZE) {
        return (
            State::BlockDownloading {
                index,
                subindex,
                crc,
                sequence,
                data,
                expected,
            },
            Vec::new(),
        );
    }
    let ack = [
        command::BLOCK_DOWNLOAD_RESPONSE | command::BLOCK_ACK,
        sequence,
        SERVER_BLOCK_SIZE,
        0,
        0,
        0,
        0,
        0,
    ];
    let next = if last && in_order {
        State::BlockDownloadEnding {
            index,
            subindex,
            crc,
            data,
            expected,
        }
    } else {
        // Anything after the acknowledged segment is sent again.
        State::BlockDownloading {
            index,
            subindex,
            crc,
            sequence: 0,
            data,
            expected,
        }
    };
    (next, vec![ack])
}

fn block_download_end(
    request: &[u8; 8],
    store: &mut dyn ObjectStore,
    index: u16,
    subindex: u8,
    crc: bool,
    mut data: Vec<u8>,
    expected: Option<usize>,
) -> Result<Step, Abort> {
    let fail = |code| Abort {
        index,
        subindex,
        code,
    };
    let unused = usize::from((request[0] >> 2) & 0x07);
    data.truncate(data.len().saturating_sub(unused));
    if crc && crc16(&data) != u16::from_le_bytes([request[1], request[2]]) {
        return Err(fail(AbortCode::CrcError));
    }
    if expected.is_some_and(|size| size != data.len()) {
        return Err(fail(AbortCode::LengthMismatch));
    }
    store.write(index, subindex, &data).map_err(fail)?;
    let confirm = [
        command::BLOCK_DOWNLOAD_RESPONSE | command::BLOCK_END,
        0,
        0,
        0,
        0,
        0,
        0,
        0,
    ];
    Ok((State::Idle, vec![confirm]))
}

fn block_upload_ack(
    request: &[u8; 8],
    index: u16,
    subindex: u8,
    crc: bool,
    data: Vec<u8>,
    acknowledged: usize,
) -> Result<Step, Abort> {
    let block_size = request[2];
    if !(1..=MAX_BLOCK_SIZE).contains(&block_size) {
        return Err(Abort {
            index,
            subindex,
            code: AbortCode::InvalidBlockSize,
        });
    }
    let acknowledged = acknowledged + usize::from(request[1]);
    if acknowledged < segment_count(data.len()) {
        let segments = block_segments(&data, acknowledged, block_size);
        return Ok((
            State::BlockUploading {
                index,
                subindex,
                crc,
                data,
                acknowledged,
                block_size,
            },
            segments,
        ));
    }

    let remainder = data.len() % SEGMENT_DATA;
    let filled = match (data.is_empty(), remainder) {
        (true, _) => 0,
        (false, 0) => SEGMENT_DATA,
        (false, filled) => filled,
    };
    let unused = unused_bytes(SEGMENT_DATA, filled);
    let checksum = if crc { crc16(&data) } else { 0 };
    let [crc_low, crc_high] = checksum.to_le_bytes();
    let end = [
        command::BLOCK_UPLOAD_RESPONSE | (unused << 2) | command::BLOCK_END,
        crc_low,
        crc_high,
        0,
        0,
        0,
        0,
        0,
    ];
    Ok((State::BlockUploadEnding, vec![end]))
}

/// Segments needed for `len` bytes; an empty value still takes one.
fn segment_count(len: usize) -> usize {
    len.div_ceil(SEGMENT_DATA).max(1)
}

fn block_segments(data: &[u8], first: usize, block_size: u8) -> Vec<[u8; 8]> {
    let total = segment_count(data.len());
    (first..total)
        .take(usize::from(block_size))
        .zip(1_u8..)
        .map(|(segment, sequence)| {
            let start = segment * SEGMENT_DATA;
            let end = (start + SEGMENT_DATA).min(data.len());
            let chunk = data.get(start..end).unwrap_or_default();
            let last = segment + 1 == total;
            let header = sequence | if last { command::LAST_BLOCK_SEGMENT } else { 0 };
            segment_payload(header, chunk)
        })
        .collect()
}

fn announced_size(request: &[u8; 8]) -> Option<usize> {
    if request[0] & command::SIZE_INDICATED == 0 {
        return None;
    }
    usize::try_from(trailing_u32(request)).ok()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::{fixture, rstest};

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        objects: BTreeMap<(u16, u8), Vec<u8>>,
    }

    impl ObjectStore for MemoryStore {
        fn read(&mut self, index: u16, subindex: u8) -> Result<Vec<u8>, AbortCode> {
            self.objects
                .get(&(index, subindex))
                .cloned()
                .ok_or(AbortCode::NoSuchObject)
        }

        fn write(&mut self, index: u16, subindex: u8, data: &[u8]) -> Result<(), AbortCode> {
            self.objects.insert((index, subindex), data.to_vec());
            Ok(())
        }
    }

    #[fixture]
    fn store() -> MemoryStore {
        let mut store = MemoryStore::default();
        store.objects.insert((0x1017, 0), vec![0xE8, 0x03]);
        store.objects.insert((0x1008, 0), b"SimNode".to_vec());
        store
    }

    #[rstest]
    fn expedited_upload_reports_size(mut store: MemoryStore) {
        let mut server = SdoServer::default();
        let request = initiate_payload(command::INITIATE_UPLOAD, 0x1017, 0, [0; 4]);
        let responses = server.handle(&request, &mut store);
        assert_eq!(responses, vec![[0x4B, 0x17, 0x10, 0x00, 0xE8, 0x03, 0, 0]]);
    }

    #[rstest]
    fn expedited_download_writes_value(mut store: MemoryStore) {
        let mut server = SdoServer::default();
        let request = initiate_payload(0x2B, 0x1017, 0, [0xC4, 0x09, 0, 0]);
        let responses = server.handle(&request, &mut store);
        assert_eq!(responses[0][0], command::INITIATE_DOWNLOAD_RESPONSE);
        assert_eq!(store.objects.get(&(0x1017, 0)), Some(&vec![0xC4, 0x09]));
    }

    #[rstest]
    fn missing_objects_abort(mut store: MemoryStore) {
        let mut server = SdoServer::default();
        let request = initiate_payload(command::INITIATE_UPLOAD, 0x2222, 0, [0; 4]);
        let responses = server.handle(&request, &mut store);
        assert_eq!(responses[0][0], command::ABORT);
        assert_eq!(trailing_u32(&responses[0]), AbortCode::NoSuchObject.code());
    }

    #[rstest]
    fn segmented_upload_alternates_toggle(mut store: MemoryStore) {
        let mut server = SdoServer::default();
        let request = initiate_payload(command::INITIATE_UPLOAD, 0x1008, 0, [0; 4]);
        let initiate = server.handle(&request, &mut store);
        assert_eq!(trailing_u32(&initiate[0]), 7);

        let segment = server.handle(&segment_payload(command::UPLOAD_SEGMENT, &[]), &mut store);
        assert_eq!(segment[0][0], command::NO_MORE_SEGMENTS);
        assert_eq!(&segment[0][1..], b"SimNode");
    }

    #[rstest]
    fn wrong_toggle_aborts(mut store: MemoryStore) {
        let mut server = SdoServer::default();
        let request = initiate_payload(command::INITIATE_UPLOAD, 0x1008, 0, [0; 4]);
        server.handle(&request, &mut store);
        let responses = server.handle(
            &segment_payload(command::UPLOAD_SEGMENT | command::TOGGLE, &[]),
            &mut store,
        );
        assert_eq!(trailing_u32(&responses[0]), AbortCode::ToggleBit.code());
    }

    #[rstest]
    fn block_upload_sends_one_sub_block(mut store: MemoryStore) {
        let mut server = SdoServer::default();
        let initiate = initiate_payload(
            command::BLOCK_UPLOAD | command::CRC_SUPPORTED,
            0x1008,
            0,
            [MAX_BLOCK_SIZE, 0, 0, 0],
        );
        server.handle(&initiate, &mut store);
        let segments = server.handle(&[command::BLOCK_UPLOAD | command::BLOCK_START, 0, 0, 0, 0, 0, 0, 0], &mut store);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0][0], 1 | command::LAST_BLOCK_SEGMENT);

        let end = server.handle(
            &[command::BLOCK_UPLOAD | command::BLOCK_ACK, 1, MAX_BLOCK_SIZE, 0, 0, 0, 0, 0],
            &mut store,
        );
        assert_eq!(end[0][0], command::BLOCK_UPLOAD_RESPONSE | command::BLOCK_END);
        assert_eq!(u16::from_le_bytes([end[0][1], end[0][2]]), crc16(b"SimNode"));
    }

    #[rstest]
    fn block_upload_end_counts_unused_bytes(mut store: MemoryStore) {
        let mut server = SdoServer::default();
        let initiate = initiate_payload(command::BLOCK_UPLOAD, 0x1017, 0, [MAX_BLOCK_SIZE, 0, 0, 0]);
        server.handle(&initiate, &mut store);
        server.handle(&[command::BLOCK_UPLOAD | command::BLOCK_START, 0, 0, 0, 0, 0, 0, 0], &mut store);
        let end = server.handle(
            &[command::BLOCK_UPLOAD | command::BLOCK_ACK, 1, MAX_BLOCK_SIZE, 0, 0, 0, 0, 0],
            &mut store,
        );
        assert_eq!(end[0][0], command::BLOCK_UPLOAD_RESPONSE | (5 << 2) | command::BLOCK_END);
    }

    #[rstest]
    fn block_download_acknowledges_last_good_segment(mut store: MemoryStore) {
        let mut server = SdoServer::default();
        let initiate = initiate_payload(
            command::BLOCK_DOWNLOAD | command::CRC_SUPPORTED | command::EXPEDITED,
            0x2000,
            0,
            14_u32.to_le_bytes(),
        );
        let response = server.handle(&initiate, &mut store);
        assert_eq!(response[0][4], SERVER_BLOCK_SIZE);

        assert!(server.handle(&segment_payload(1, b"abcdefg"), &mut store).is_empty());
        // Segment two is lost; three arrives flagged as last.
        let ack = server.handle(&segment_payload(3 | command::LAST_BLOCK_SEGMENT, b"zzzzzzz"), &mut store);
        assert_eq!(ack[0][1], 1);

        let ack = server.handle(&segment_payload(1 | command::LAST_BLOCK_SEGMENT, b"hijklmn"), &mut store);
        assert_eq!(ack[0][1], 1);
        let [crc_low, crc_high] = crc16(b"abcdefghijklmn").to_le_bytes();
        let end = [command::BLOCK_DOWNLOAD | command::BLOCK_END, crc_low, crc_high, 0, 0, 0, 0, 0];
        let confirm = server.handle(&end, &mut store);
        assert_eq!(confirm[0][0], command::BLOCK_DOWNLOAD_RESPONSE | command::BLOCK_END);
        assert_eq!(store.objects.get(&(0x2000, 0)), Some(&b"abcdefghijklmn".to_vec()));
    }
}
