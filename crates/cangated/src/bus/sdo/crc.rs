//! CRC-16/XMODEM as used by block transfers (polynomial 0x1021, seed 0).

const POLYNOMIAL: u16 = 0x1021;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0_u16; 256];
    let mut byte: u16 = 0;
    let mut position = 0;
    while position < table.len() {
        let mut crc = byte << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 == 0 {
                crc << 1
            } else {
                (crc << 1) ^ POLYNOMIAL
            };
            bit += 1;
        }
        table[position] = crc;
        byte += 1;
        position += 1;
    }
    table
}

/// Checksum of `data`.
pub(crate) fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0, |crc, byte| {
        let [high, _] = crc.to_be_bytes();
        let position = usize::from(high ^ byte);
        (crc << 8) ^ TABLE[position]
    })
}
