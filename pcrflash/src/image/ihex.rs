//! Intel HEX decoding.
//!
//! Turns Intel HEX text into one contiguous [`BinaryImage`].
//!
//! ## Record Format
//!
//! ```text
//! +-----+-------+---------+------+---------------+----------+
//! | ':' | COUNT | ADDRESS | TYPE |     DATA      | CHECKSUM |
//! +-----+-------+---------+------+---------------+----------+
//! |  1  |   2   |    4    |  2   |  COUNT * 2    |    2     |
//! +-----+-------+---------+------+---------------+----------+
//! ```
//!
//! Field widths are in hex digits. Digits are case-insensitive. Blank lines
//! and CR/LF line endings are ignored.
//!
//! Extended address records (types 2 and 4) change the base address for
//! the data records that follow them in document order. Gaps between data
//! extents are filled with `0xFF`, the erased-flash value. Overlapping data
//! records overwrite each other, last write wins.

use crate::checksum::{crc16_xmodem, hex_record_checksum};
use crate::error::FormatError;
use log::{debug, trace};

/// Fill value for addresses not covered by any data record.
pub const FILL_BYTE: u8 = 0xFF;

/// Largest flattened image the decoder will allocate (256 MiB).
pub const MAX_IMAGE_SPAN: u64 = 256 * 1024 * 1024;

/// Hex digits in a record without data: count, address, type and checksum.
const MIN_RECORD_DIGITS: usize = (1 + 2 + 1 + 1) * 2;

/// Intel HEX record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// Data record (0x00).
    Data,
    /// End of file (0x01).
    EndOfFile,
    /// Extended segment address (0x02).
    ExtendedSegmentAddress,
    /// Start segment address (0x03).
    StartSegmentAddress,
    /// Extended linear address (0x04).
    ExtendedLinearAddress,
    /// Start linear address (0x05).
    StartLinearAddress,
    /// Any other type. Parsed and ignored.
    Other(u8),
}

impl From<u8> for RecordType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Data,
            0x01 => Self::EndOfFile,
            0x02 => Self::ExtendedSegmentAddress,
            0x03 => Self::StartSegmentAddress,
            0x04 => Self::ExtendedLinearAddress,
            0x05 => Self::StartLinearAddress,
            other => Self::Other(other),
        }
    }
}

impl RecordType {
    /// Raw type byte as it appears in the record.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Data => 0x00,
            Self::EndOfFile => 0x01,
            Self::ExtendedSegmentAddress => 0x02,
            Self::StartSegmentAddress => 0x03,
            Self::ExtendedLinearAddress => 0x04,
            Self::StartLinearAddress => 0x05,
            Self::Other(value) => value,
        }
    }
}

/// One parsed line of an Intel HEX document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// 16-bit offset relative to the current base address.
    pub address: u16,
    /// Record type.
    pub record_type: RecordType,
    /// Record payload (0-255 bytes).
    pub data: Vec<u8>,
}

impl HexRecord {
    /// Parse a single record line. `line` is the 1-based source line used
    /// in error reports.
    pub fn parse(text: &str, line: usize) -> Result<Self, FormatError> {
        let body = text
            .trim()
            .strip_prefix(':')
            .ok_or(FormatError::MissingColon { line })?
            .as_bytes();

        if body.len() < MIN_RECORD_DIGITS {
            return Err(FormatError::TooShort { line });
        }
        if !body.iter().all(u8::is_ascii_hexdigit) {
            return Err(FormatError::InvalidCharacter { line });
        }

        let byte_at = |index: usize| (nibble(body[2 * index]) << 4) | nibble(body[2 * index + 1]);

        let byte_count = byte_at(0);
        let expected_digits = MIN_RECORD_DIGITS + usize::from(byte_count) * 2;
        if body.len() < expected_digits {
            return Err(FormatError::TooShort { line });
        }
        if body.len() > expected_digits {
            return Err(FormatError::TooLong { line });
        }

        let address = u16::from_be_bytes([byte_at(1), byte_at(2)]);
        let type_byte = byte_at(3);
        let data: Vec<u8> = (4..4 + usize::from(byte_count)).map(byte_at).collect();
        let found = byte_at(4 + usize::from(byte_count));

        let expected = hex_record_checksum(byte_count, address, type_byte, &data);
        if expected != found {
            return Err(FormatError::ChecksumMismatch {
                line,
                expected,
                found,
            });
        }

        let record_type = RecordType::from(type_byte);
        if matches!(
            record_type,
            RecordType::ExtendedSegmentAddress | RecordType::ExtendedLinearAddress
        ) && data.len() != 2
        {
            return Err(FormatError::InvalidAddressRecord { line });
        }

        Ok(Self {
            address,
            record_type,
            data,
        })
    }

    /// Base address established by this record, if it is an extended
    /// address record.
    pub fn base_address(&self) -> Option<u32> {
        match (self.record_type, self.data.as_slice()) {
            (RecordType::ExtendedLinearAddress, &[hi, lo]) => {
                Some((u32::from(hi) << 24) | (u32::from(lo) << 16))
            },
            (RecordType::ExtendedSegmentAddress, &[hi, lo]) => {
                Some(u32::from(u16::from_be_bytes([hi, lo])) << 4)
            },
            _ => None,
        }
    }
}

/// Value of a single ASCII hex digit. Callers validate the digit first.
fn nibble(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Non-blank trimmed lines paired with their 1-based line number.
fn record_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}

/// Parse every record of a document.
pub fn parse_records(text: &str) -> Result<Vec<HexRecord>, FormatError> {
    let records = record_lines(text)
        .map(|(line, record)| HexRecord::parse(record, line))
        .collect::<Result<Vec<_>, _>>()?;

    if records.is_empty() {
        return Err(FormatError::EmptyInput);
    }
    Ok(records)
}

/// Data records paired with their absolute address.
///
/// Base address records are applied in document order, so each data record
/// sees the base in effect at its own position.
fn data_extents(records: &[HexRecord]) -> impl Iterator<Item = (u32, &HexRecord)> {
    records
        .iter()
        .scan(0u32, |base, record| {
            if let Some(new_base) = record.base_address() {
                *base = new_base;
            }
            Some((base.wrapping_add(u32::from(record.address)), record))
        })
        .filter(|(_, record)| record.record_type == RecordType::Data)
}

/// Flattened firmware image.
///
/// Every data record of the source maps into
/// `[base_offset, base_offset + len)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    data: Vec<u8>,
    base_offset: u32,
}

impl BinaryImage {
    /// Wrap raw bytes that start at `base_offset`.
    pub fn new(data: Vec<u8>, base_offset: u32) -> Self {
        Self { data, base_offset }
    }

    /// Image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the image and return its bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Absolute address of the first byte.
    pub fn base_offset(&self) -> u32 {
        self.base_offset
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Absolute address one past the last byte.
    pub fn end_address(&self) -> u64 {
        u64::from(self.base_offset) + self.data.len() as u64
    }

    /// CRC-16/XMODEM of the whole image.
    pub fn crc16(&self) -> u16 {
        crc16_xmodem(&self.data)
    }
}

/// Decode Intel HEX text into a contiguous image.
pub fn decode(text: &str) -> Result<BinaryImage, FormatError> {
    let records = parse_records(text)?;
    debug!("Parsed {} HEX records", records.len());

    // First pass: address span of all data records.
    let (min_address, max_address) = data_extents(&records)
        .map(|(address, record)| {
            (
                u64::from(address),
                u64::from(address) + record.data.len() as u64,
            )
        })
        .reduce(|(lo, hi), (start, end)| (lo.min(start), hi.max(end)))
        .ok_or(FormatError::NoDataRecords)?;

    let span = max_address - min_address;
    if span > MAX_IMAGE_SPAN {
        return Err(FormatError::ImageTooLarge { span });
    }

    // Second pass: copy data over the erased fill.
    let mut data = vec![FILL_BYTE; span as usize];
    for (address, record) in data_extents(&records) {
        let offset = (u64::from(address) - min_address) as usize;
        trace!(
            "Data record @ 0x{address:08X}: {} bytes",
            record.data.len()
        );
        data[offset..offset + record.data.len()].copy_from_slice(&record.data);
    }

    let image = BinaryImage::new(data, min_address as u32);
    debug!(
        "Decoded image: 0x{:08X}..0x{:08X} ({} bytes)",
        image.base_offset(),
        image.end_address(),
        image.len()
    );
    Ok(image)
}

/// Whether `text` starts with a valid Intel HEX record.
///
/// Parses only the first non-blank line and never fails.
pub fn looks_like_hex(text: &str) -> bool {
    record_lines(text)
        .next()
        .is_some_and(|(line, record)| HexRecord::parse(record, line).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a well-formed record line.
    fn record(address: u16, record_type: u8, data: &[u8]) -> String {
        let checksum = hex_record_checksum(data.len() as u8, address, record_type, data);
        let payload: String = data.iter().map(|b| format!("{b:02X}")).collect();
        format!(
            ":{:02X}{address:04X}{record_type:02X}{payload}{checksum:02X}",
            data.len()
        )
    }

    #[test]
    fn test_parse_data_record() {
        let rec = HexRecord::parse(":10010000214601360121470136007EFE09D2190140", 1).unwrap();
        assert_eq!(rec.address, 0x0100);
        assert_eq!(rec.record_type, RecordType::Data);
        assert_eq!(rec.data.len(), 16);
        assert_eq!(rec.data[0], 0x21);
        assert_eq!(rec.data[15], 0x01);
    }

    #[test]
    fn test_parse_lowercase_digits() {
        let rec = HexRecord::parse(":020000040800f2", 1).unwrap();
        assert_eq!(rec.record_type, RecordType::ExtendedLinearAddress);
        assert_eq!(rec.base_address(), Some(0x0800_0000));
    }

    #[test]
    fn test_parse_eof_record() {
        let rec = HexRecord::parse(":00000001FF", 1).unwrap();
        assert_eq!(rec.record_type, RecordType::EndOfFile);
        assert!(rec.data.is_empty());
        assert_eq!(rec.base_address(), None);
    }

    #[test]
    fn test_parse_unknown_type_is_kept() {
        let line = record(0, 0x07, &[0xAA]);
        let rec = HexRecord::parse(&line, 1).unwrap();
        assert_eq!(rec.record_type, RecordType::Other(0x07));
        assert_eq!(rec.record_type.as_u8(), 0x07);
    }

    #[test]
    fn test_parse_missing_colon() {
        assert_eq!(
            HexRecord::parse("00000001FF", 3),
            Err(FormatError::MissingColon { line: 3 })
        );
    }

    #[test]
    fn test_parse_too_short() {
        assert_eq!(
            HexRecord::parse(":000000", 1),
            Err(FormatError::TooShort { line: 1 })
        );
        // Declares 4 data bytes but carries only 1
        assert_eq!(
            HexRecord::parse(":0400000011EB", 2),
            Err(FormatError::TooShort { line: 2 })
        );
        // Short frames report length before content
        assert_eq!(
            HexRecord::parse(":0G", 3),
            Err(FormatError::TooShort { line: 3 })
        );
    }

    #[test]
    fn test_parse_too_long() {
        assert_eq!(
            HexRecord::parse(":00000001FF00", 1),
            Err(FormatError::TooLong { line: 1 })
        );
    }

    #[test]
    fn test_parse_invalid_character() {
        assert_eq!(
            HexRecord::parse(":0000000G01", 1),
            Err(FormatError::InvalidCharacter { line: 1 })
        );
    }

    #[test]
    fn test_parse_checksum_mismatch_any_delta() {
        let good = record(0x0010, 0x00, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let stored = u8::from_str_radix(&good[good.len() - 2..], 16).unwrap();
        let prefix = &good[..good.len() - 2];

        for delta in 1..=255u8 {
            let bad = format!("{prefix}{:02X}", stored.wrapping_add(delta));
            assert!(
                matches!(
                    HexRecord::parse(&bad, 1),
                    Err(FormatError::ChecksumMismatch { expected, found, .. })
                        if expected == stored && found == stored.wrapping_add(delta)
                ),
                "delta {delta} was not rejected"
            );
        }
    }

    #[test]
    fn test_parse_short_address_record() {
        let line = record(0, 0x04, &[0x08]);
        assert_eq!(
            HexRecord::parse(&line, 5),
            Err(FormatError::InvalidAddressRecord { line: 5 })
        );
    }

    #[test]
    fn test_segment_base_address() {
        let rec = HexRecord::parse(&record(0, 0x02, &[0x12, 0x34]), 1).unwrap();
        assert_eq!(rec.base_address(), Some(0x12340));
    }

    #[test]
    fn test_decode_contiguous_records() {
        let text = [
            record(0x0100, 0x00, &[1, 2, 3, 4]),
            record(0x0104, 0x00, &[5, 6]),
            record(0x0106, 0x00, &[7, 8, 9]),
            ":00000001FF".to_string(),
        ]
        .join("\n");

        let image = decode(&text).unwrap();
        assert_eq!(image.base_offset(), 0x0100);
        assert_eq!(image.len(), 9);
        assert_eq!(image.data(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(image.end_address(), 0x0109);
    }

    #[test]
    fn test_decode_fills_gaps() {
        let text = [
            record(0x0000, 0x00, &[0x11, 0x22]),
            record(0x0005, 0x00, &[0x33]),
        ]
        .join("\n");

        let image = decode(&text).unwrap();
        assert_eq!(image.data(), &[0x11, 0x22, 0xFF, 0xFF, 0xFF, 0x33]);
    }

    #[test]
    fn test_decode_extended_linear_address() {
        let text = [
            record(0, 0x04, &[0x00, 0x01]),
            record(0x0010, 0x00, &[0xAB, 0xCD]),
            ":00000001FF".to_string(),
        ]
        .join("\r\n");

        let image = decode(&text).unwrap();
        assert_eq!(image.base_offset(), 0x0001_0010);
        assert_eq!(image.data(), &[0xAB, 0xCD]);
    }

    #[test]
    fn test_decode_extended_segment_address() {
        let text = [
            record(0, 0x02, &[0x10, 0x00]),
            record(0x0004, 0x00, &[0x01]),
        ]
        .join("\n");

        let image = decode(&text).unwrap();
        assert_eq!(image.base_offset(), 0x0001_0004);
    }

    #[test]
    fn test_decode_base_applies_in_document_order() {
        // Data before the extended address record stays at base 0
        let text = [
            record(0x0000, 0x00, &[0xAA]),
            record(0, 0x04, &[0x00, 0x01]),
            record(0x0000, 0x00, &[0xBB]),
        ]
        .join("\n");

        let image = decode(&text).unwrap();
        assert_eq!(image.base_offset(), 0);
        assert_eq!(image.len(), 0x0001_0001);
        assert_eq!(image.data()[0], 0xAA);
        assert_eq!(image.data()[0x0001_0000], 0xBB);
        assert!(image.data()[1..0x0001_0000].iter().all(|&b| b == FILL_BYTE));
    }

    #[test]
    fn test_decode_overlap_last_write_wins() {
        let text = [
            record(0x0000, 0x00, &[1, 2, 3, 4]),
            record(0x0002, 0x00, &[9, 9]),
        ]
        .join("\n");

        let image = decode(&text).unwrap();
        assert_eq!(image.data(), &[1, 2, 9, 9]);
    }

    #[test]
    fn test_decode_ignores_blank_lines_and_whitespace() {
        let text = format!(
            "\n   \n  {}  \n\n{}\n",
            record(0x0000, 0x00, &[0x42]),
            ":00000001FF"
        );
        let image = decode(&text).unwrap();
        assert_eq!(image.data(), &[0x42]);
    }

    #[test]
    fn test_decode_empty_input() {
        assert_eq!(decode(""), Err(FormatError::EmptyInput));
        assert_eq!(decode("\n  \r\n\t\n"), Err(FormatError::EmptyInput));
    }

    #[test]
    fn test_decode_no_data_records() {
        let text = [record(0, 0x04, &[0x00, 0x01]), ":00000001FF".to_string()].join("\n");
        assert_eq!(decode(&text), Err(FormatError::NoDataRecords));
    }

    #[test]
    fn test_decode_reports_source_line() {
        let text = format!("{}\n\n:0000000100\n", record(0, 0x00, &[1]));
        assert_eq!(
            decode(&text),
            Err(FormatError::ChecksumMismatch {
                line: 3,
                expected: 0xFF,
                found: 0x00,
            })
        );
    }

    #[test]
    fn test_decode_is_all_or_nothing() {
        let text = [record(0, 0x00, &[1, 2]), "garbage".to_string()].join("\n");
        assert_eq!(decode(&text), Err(FormatError::MissingColon { line: 2 }));
    }

    #[test]
    fn test_decode_rejects_huge_span() {
        let text = [
            record(0x0000, 0x00, &[0x01]),
            record(0, 0x04, &[0x80, 0x00]),
            record(0x0000, 0x00, &[0x02]),
        ]
        .join("\n");
        assert!(matches!(
            decode(&text),
            Err(FormatError::ImageTooLarge { span }) if span == 0x8000_0001
        ));
    }

    #[test]
    fn test_image_crc16() {
        let image = BinaryImage::new(b"123456789".to_vec(), 0);
        assert_eq!(image.crc16(), 0x31C3);
    }

    #[test]
    fn test_looks_like_hex() {
        assert!(looks_like_hex(":00000001FF\n"));
        assert!(looks_like_hex("\n\n:020000040800F2\nnot checked"));
        assert!(!looks_like_hex(""));
        assert!(!looks_like_hex("hello world"));
        assert!(!looks_like_hex(":00000001FE"));
        assert!(!looks_like_hex("\x7fELF"));
    }
}
