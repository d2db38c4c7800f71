//! Transmit process-data (TPDO) configuration sequence.

use super::sdo::SdoClient;
use super::{BusError, TpdoConfig, TransferMode};

/// Set in the COB-ID entry while a slot is disabled.
const INVALID_BIT: u32 = 0x8000_0000;

/// Store parameters object; subindex 1 saves every parameter.
const STORE_INDEX: u16 = 0x1010;
const STORE_ALL: u8 = 0x01;
/// `"save"` read as a little-endian word.
const SAVE_SIGNATURE: u32 = 0x6576_6173;

const COB_ID_SUB: u8 = 1;
const TRANSMISSION_TYPE_SUB: u8 = 2;
const EVENT_TIMER_SUB: u8 = 5;

/// Applies `config` to the node and persists it.
///
/// The slot is disabled while its parameters change, the mapping (when
/// given) is rewritten with its count cleared first, and the node is asked
/// to store its parameters before returning.
pub(super) fn configure(client: &SdoClient<'_>, config: &TpdoConfig) -> Result<(), BusError> {
    let communication = config.slot.communication_index();
    let cob_id = read_u32(client, communication, COB_ID_SUB)?;
    write(client, communication, COB_ID_SUB, &(cob_id | INVALID_BIT).to_le_bytes())?;

    if let Some(mapping) = &config.mapping {
        let mapping_index = config.slot.mapping_index();
        write(client, mapping_index, 0, &[0])?;
        let mut count = 0_u8;
        for entry in mapping {
            count += 1;
            write(client, mapping_index, count, &entry.encode().to_le_bytes())?;
        }
        write(client, mapping_index, 0, &[count])?;
    }

    write(
        client,
        communication,
        TRANSMISSION_TYPE_SUB,
        &[config.transmission_type],
    )?;
    write(
        client,
        communication,
        EVENT_TIMER_SUB,
        &config.event_timer_ms.to_le_bytes(),
    )?;

    let cob_id = if config.enabled {
        cob_id & !INVALID_BIT
    } else {
        cob_id | INVALID_BIT
    };
    write(client, communication, COB_ID_SUB, &cob_id.to_le_bytes())?;
    write(client, STORE_INDEX, STORE_ALL, &SAVE_SIGNATURE.to_le_bytes())
}

fn read_u32(client: &SdoClient<'_>, index: u16, subindex: u8) -> Result<u32, BusError> {
    let raw = client.upload(index, subindex, TransferMode::Expedited)?;
    let mut bytes = [0_u8; 4];
    for (slot, byte) in bytes.iter_mut().zip(&raw) {
        *slot = *byte;
    }
    Ok(u32::from_le_bytes(bytes))
}

fn write(client: &SdoClient<'_>, index: u16, subindex: u8, data: &[u8]) -> Result<(), BusError> {
    client.download(index, subindex, TransferMode::Expedited, data)
}
