//! Object transfer protocol (SDO) framing.
//!
//! Requests travel on `0x600 + node`, server responses on `0x580 + node`.
//! The client side lives in [`client`]; the constants and helpers here are
//! shared with the simulated server.

mod abort;
mod block;
mod client;
mod crc;

pub(crate) use abort::{AbortCode, describe_abort};
pub(crate) use client::{SdoClient, segment_payload};
pub(crate) use crc::crc16;

/// Base identifier of client requests.
pub(crate) const REQUEST_BASE: u32 = 0x600;
/// Base identifier of server responses.
pub(crate) const RESPONSE_BASE: u32 = 0x580;

/// Bytes carried by one segment.
pub(crate) const SEGMENT_DATA: usize = 7;
/// Bytes carried by an expedited transfer.
pub(crate) const EXPEDITED_DATA: usize = 4;
/// Largest block the client accepts during block uploads.
pub(crate) const MAX_BLOCK_SIZE: u8 = 127;

/// Command specifier bytes, named from the client's point of view.
pub(crate) mod command {
    /// Client: initiate download. Server: initiate download response.
    pub(crate) const INITIATE_DOWNLOAD: u8 = 0x20;
    pub(crate) const INITIATE_DOWNLOAD_RESPONSE: u8 = 0x60;
    /// Client: download segment. Server: download segment response.
    pub(crate) const DOWNLOAD_SEGMENT: u8 = 0x00;
    pub(crate) const DOWNLOAD_SEGMENT_RESPONSE: u8 = 0x20;
    /// Client: initiate upload. Server: initiate upload response.
    pub(crate) const INITIATE_UPLOAD: u8 = 0x40;
    pub(crate) const INITIATE_UPLOAD_RESPONSE: u8 = 0x40;
    /// Client: upload segment request. Server: upload segment response.
    pub(crate) const UPLOAD_SEGMENT: u8 = 0x60;
    pub(crate) const UPLOAD_SEGMENT_RESPONSE: u8 = 0x00;
    /// Either side: abort transfer.
    pub(crate) const ABORT: u8 = 0x80;
    /// Client block download, server block download response.
    pub(crate) const BLOCK_DOWNLOAD: u8 = 0xC0;
    pub(crate) const BLOCK_DOWNLOAD_RESPONSE: u8 = 0xA0;
    /// Client block upload, server block upload response.
    pub(crate) const BLOCK_UPLOAD: u8 = 0xA0;
    pub(crate) const BLOCK_UPLOAD_RESPONSE: u8 = 0xC0;

    /// Mask selecting the command specifier bits.
    pub(crate) const SPECIFIER_MASK: u8 = 0xE0;
    /// Expedited flag of initiate frames.
    pub(crate) const EXPEDITED: u8 = 0x02;
    /// Size indicated flag of initiate frames.
    pub(crate) const SIZE_INDICATED: u8 = 0x01;
    /// Toggle bit of segment frames.
    pub(crate) const TOGGLE: u8 = 0x10;
    /// Last segment flag of segmented transfers.
    pub(crate) const NO_MORE_SEGMENTS: u8 = 0x01;
    /// Last segment flag of block sub-blocks.
    pub(crate) const LAST_BLOCK_SEGMENT: u8 = 0x80;
    /// CRC support flag of block initiate frames.
    pub(crate) const CRC_SUPPORTED: u8 = 0x04;

    /// Block sub-commands carried in the low bits.
    pub(crate) const BLOCK_INITIATE: u8 = 0x00;
    pub(crate) const BLOCK_END: u8 = 0x01;
    pub(crate) const BLOCK_ACK: u8 = 0x02;
    pub(crate) const BLOCK_START: u8 = 0x03;
    pub(crate) const BLOCK_SUBCOMMAND_MASK: u8 = 0x03;
}

/// Frame payload addressing `index:subindex` with `specifier` and four data
/// bytes.
pub(crate) fn initiate_payload(specifier: u8, index: u16, subindex: u8, data: [u8; 4]) -> [u8; 8] {
    let [index_low, index_high] = index.to_le_bytes();
    let [d0, d1, d2, d3] = data;
    [specifier, index_low, index_high, subindex, d0, d1, d2, d3]
}

/// Index and subindex echoed in bytes 1..=3 of an initiate frame.
pub(crate) fn multiplexer(payload: &[u8; 8]) -> (u16, u8) {
    let [_, index_low, index_high, subindex, ..] = *payload;
    (u16::from_le_bytes([index_low, index_high]), subindex)
}

/// Bytes left empty when `len` bytes occupy a field of `capacity` bytes.
///
/// Capacities are at most [`SEGMENT_DATA`], so the count always fits the
/// three-bit field it is packed into.
pub(crate) fn unused_bytes(capacity: usize, len: usize) -> u8 {
    u8::try_from(capacity.saturating_sub(len)).unwrap_or(0)
}

/// Little-endian `u32` carried in bytes 4..=7.
pub(crate) fn trailing_u32(payload: &[u8; 8]) -> u32 {
    let [.., d0, d1, d2, d3] = *payload;
    u32::from_le_bytes([d0, d1, d2, d3])
}
