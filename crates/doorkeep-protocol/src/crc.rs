//! CRC16/XMODEM (poly 0x1021, init 0, no reflection, no final xor).

const POLY: u16 = 0x1021;

/// Continue a CRC16/XMODEM computation over `data`.
///
/// Chaining calls is equivalent to one call over the concatenated input,
/// which is how the key hash is built.
#[must_use]
pub fn crc16_xmodem_update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[must_use]
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    crc16_xmodem_update(0, data)
}

/// Four uppercase hex digits of the checksum, as carried on the wire.
#[must_use]
pub fn checksum_hex(data: &[u8]) -> String {
    format!("{:04X}", crc16_xmodem(data))
}
