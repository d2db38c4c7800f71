//! Block transfers: sub-blocks of numbered segments acknowledged together and
//! closed with a CRC.

use super::client::{SdoClient, Transfer, segment_payload};
use super::{
    AbortCode, MAX_BLOCK_SIZE, SEGMENT_DATA, command, crc16, initiate_payload, trailing_u32,
    unused_bytes,
};
use crate::bus::BusError;

/// Downloads `data` using block transfer.
pub(super) fn download(client: &SdoClient<'_>, transfer: Transfer, data: &[u8]) -> Result<(), BusError> {
    let size = u32::try_from(data.len()).map_err(|_| BusError::SizeMismatch { len: data.len() })?;
    let initiate = initiate_payload(
        command::BLOCK_DOWNLOAD
            | command::CRC_SUPPORTED
            | command::EXPEDITED
            | command::BLOCK_INITIATE,
        transfer.index,
        transfer.subindex,
        size.to_le_bytes(),
    );
    client.send(transfer, &initiate)?;
    let response = client.receive(transfer)?;
    client.expect_specifier(transfer, &response, command::BLOCK_DOWNLOAD_RESPONSE)?;
    client.expect_multiplexer(transfer, &response)?;
    let use_crc = response[0] & command::CRC_SUPPORTED != 0;
    let mut block_size = checked_block_size(client, transfer, response[4])?;

    let empty: [&[u8]; 1] = [&[]];
    let chunks: Vec<&[u8]> = if data.is_empty() {
        empty.to_vec()
    } else {
        data.chunks(SEGMENT_DATA).collect()
    };

    let mut next = 0;
    while next < chunks.len() {
        let block_start = next;
        let mut sequence = 0_u8;
        while sequence < block_size {
            let Some(chunk) = chunks.get(next) else { break };
            sequence += 1;
            let last = next + 1 == chunks.len();
            let header = sequence | if last { command::LAST_BLOCK_SEGMENT } else { 0 };
            client.send(transfer, &segment_payload(header, chunk))?;
            next += 1;
        }

        let ack = client.receive(transfer)?;
        if ack[0] != command::BLOCK_DOWNLOAD_RESPONSE | command::BLOCK_ACK {
            client.abort(transfer, AbortCode::InvalidCommand);
            return Err(client.protocol(transfer, "expected block acknowledgement"));
        }
        let acknowledged = ack[1];
        if acknowledged > sequence {
            client.abort(transfer, AbortCode::InvalidSequence);
            return Err(client.protocol(transfer, "acknowledged an unsent segment"));
        }
        // Segments after the acknowledged one are sent again in the next block.
        next = block_start + usize::from(acknowledged);
        block_size = checked_block_size(client, transfer, ack[2])?;
    }

    let last_len = chunks.last().map_or(0, |chunk| chunk.len());
    let unused = unused_bytes(SEGMENT_DATA, last_len);
    let crc = if use_crc { crc16(data) } else { 0 };
    let [crc_low, crc_high] = crc.to_le_bytes();
    let end = [
        command::BLOCK_DOWNLOAD | (unused << 2) | command::BLOCK_END,
        crc_low,
        crc_high,
        0,
        0,
        0,
        0,
        0,
    ];
    client.send(transfer, &end)?;
    let response = client.receive(transfer)?;
    if response[0] != command::BLOCK_DOWNLOAD_RESPONSE | command::BLOCK_END {
        client.abort(transfer, AbortCode::InvalidCommand);
        return Err(client.protocol(transfer, "expected block end confirmation"));
    }
    Ok(())
}

/// Uploads an object using block transfer.
pub(super) fn upload(client: &SdoClient<'_>, transfer: Transfer) -> Result<Vec<u8>, BusError> {
    // Byte 5, the protocol switch threshold, stays zero to keep block mode.
    let initiate = initiate_payload(
        command::BLOCK_UPLOAD | command::CRC_SUPPORTED | command::BLOCK_INITIATE,
        transfer.index,
        transfer.subindex,
        [MAX_BLOCK_SIZE, 0, 0, 0],
    );
    client.send(transfer, &initiate)?;
    let response = client.receive(transfer)?;
    client.expect_specifier(transfer, &response, command::BLOCK_UPLOAD_RESPONSE)?;
    client.expect_multiplexer(transfer, &response)?;
    if response[0] & command::BLOCK_SUBCOMMAND_MASK != command::BLOCK_INITIATE {
        client.abort(transfer, AbortCode::InvalidCommand);
        return Err(client.protocol(transfer, "expected block upload initiation"));
    }
    let use_crc = response[0] & command::CRC_SUPPORTED != 0;
    let announced = (response[0] & command::EXPEDITED != 0).then(|| trailing_u32(&response));

    client.send(transfer, &control(command::BLOCK_START, 0, 0))?;

    let mut data = Vec::new();
    loop {
        let mut acknowledged = 0_u8;
        let mut finished = false;
        loop {
            let segment = client.receive(transfer)?;
            let sequence = segment[0] & !command::LAST_BLOCK_SEGMENT;
            // Out-of-order segments are dropped; the acknowledgement asks
            // the server to resend from the last good one.
            if sequence == acknowledged + 1 {
                acknowledged = sequence;
                data.extend(segment.iter().skip(1));
                finished = segment[0] & command::LAST_BLOCK_SEGMENT != 0;
            }
            if finished || acknowledged >= MAX_BLOCK_SIZE {
                break;
            }
        }
        client.send(transfer, &control(command::BLOCK_ACK, acknowledged, MAX_BLOCK_SIZE))?;
        if finished {
            break;
        }
    }

    let end = client.receive(transfer)?;
    if end[0] & command::SPECIFIER_MASK != command::BLOCK_UPLOAD_RESPONSE
        || end[0] & command::BLOCK_SUBCOMMAND_MASK != command::BLOCK_END
    {
        client.abort(transfer, AbortCode::InvalidCommand);
        return Err(client.protocol(transfer, "expected block end"));
    }
    let unused = usize::from((end[0] >> 2) & 0x07);
    data.truncate(data.len().saturating_sub(unused));

    if use_crc {
        let expected = u16::from_le_bytes([end[1], end[2]]);
        if crc16(&data) != expected {
            client.abort(transfer, AbortCode::CrcError);
            return Err(client.protocol(transfer, "CRC mismatch"));
        }
    }
    client.send(transfer, &control(command::BLOCK_END, 0, 0))?;

    if let Some(size) = announced
        && usize::try_from(size).ok() != Some(data.len())
    {
        return Err(client.protocol(
            transfer,
            &format!("announced {size} bytes but delivered {}", data.len()),
        ));
    }
    Ok(data)
}

fn control(subcommand: u8, first: u8, second: u8) -> [u8; 8] {
    [command::BLOCK_UPLOAD | subcommand, first, second, 0, 0, 0, 0, 0]
}

fn checked_block_size(client: &SdoClient<'_>, transfer: Transfer, raw: u8) -> Result<u8, BusError> {
    if (1..=MAX_BLOCK_SIZE).contains(&raw) {
        return Ok(raw);
    }
    client.abort(transfer, AbortCode::InvalidBlockSize);
    Err(client.protocol(transfer, &format!("invalid block size {raw}")))
}
