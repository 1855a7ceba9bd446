//! Checksum primitives shared by the HEX decoder and the YMODEM sender.
//!
//! - [`crc16_xmodem`]: CRC-16/XMODEM (polynomial `0x1021`, initial value 0,
//!   no reflection, no final XOR). Every YMODEM frame carries it big-endian
//!   over its 128-byte payload.
//! - [`hex_record_checksum`]: the two's-complement byte sum that terminates
//!   every Intel HEX record.

/// CRC-16/XMODEM generator polynomial.
const CRC16_POLY: u16 = 0x1021;

/// Calculate CRC-16/XMODEM over `data`.
///
/// Must match real receivers bit for bit. The reference check value is
/// `crc16_xmodem(b"123456789") == 0x31C3`.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        let mut crc = crc ^ (u16::from(byte) << 8);
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// Calculate the checksum byte of an Intel HEX record.
///
/// Two's complement of the truncated sum of the byte count, both address
/// bytes, the record type and every data byte.
pub fn hex_record_checksum(byte_count: u8, address: u16, record_type: u8, data: &[u8]) -> u8 {
    let [addr_hi, addr_lo] = address.to_be_bytes();
    let sum = data.iter().fold(
        byte_count
            .wrapping_add(addr_hi)
            .wrapping_add(addr_lo)
            .wrapping_add(record_type),
        |acc, &b| acc.wrapping_add(b),
    );
    (!sum).wrapping_add(1)
}
