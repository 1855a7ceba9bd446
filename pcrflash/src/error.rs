//! Error types for pcrflash.

use std::io;
use thiserror::Error;

/// Result type for pcrflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pcrflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Intel HEX decoding failed.
    #[error("Invalid HEX: {0}")]
    Format(#[from] FormatError),

    /// YMODEM transfer failed.
    #[error("YMODEM error: {0}")]
    Transfer(#[from] TransferError),

    /// Firmware file cannot be used as an upload payload.
    #[error("Invalid firmware: {0}")]
    InvalidFirmware(String),
}

/// Intel HEX decoding errors.
///
/// Decoding is all-or-nothing: any of these aborts the whole document.
/// Line numbers are 1-based positions in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Input holds no non-blank lines.
    #[error("input is empty")]
    EmptyInput,

    /// Record does not begin with ':'.
    #[error("line {line}: missing start code ':'")]
    MissingColon {
        /// Source line.
        line: usize,
    },

    /// Record is shorter than its header and declared data require.
    #[error("line {line}: record too short")]
    TooShort {
        /// Source line.
        line: usize,
    },

    /// Record carries more digits than its byte count declares.
    #[error("line {line}: record too long")]
    TooLong {
        /// Source line.
        line: usize,
    },

    /// Record contains a character that is not a hex digit.
    #[error("line {line}: record contains invalid character(s)")]
    InvalidCharacter {
        /// Source line.
        line: usize,
    },

    /// Record checksum does not match its contents.
    #[error("line {line}: checksum mismatch, expected {expected:#04x}, found {found:#04x}")]
    ChecksumMismatch {
        /// Source line.
        line: usize,
        /// Checksum computed from the record contents.
        expected: u8,
        /// Checksum stored in the record.
        found: u8,
    },

    /// Extended address record without exactly two data bytes.
    #[error("line {line}: extended address record must carry 2 data bytes")]
    InvalidAddressRecord {
        /// Source line.
        line: usize,
    },

    /// Document has no data records.
    #[error("no data records found")]
    NoDataRecords,

    /// Flattened image would be unreasonably large.
    #[error("image spans {span} bytes, exceeding the supported maximum")]
    ImageTooLarge {
        /// Distance between the lowest and highest data address.
        span: u64,
    },
}

/// YMODEM transfer errors.
///
/// Every variant is terminal for the session. Nothing is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Receiver did not request CRC mode at session start.
    #[error("receiver did not request CRC mode")]
    NoCrcRequest,

    /// Expected handshake byte did not arrive in time.
    #[error("timeout waiting for receiver")]
    Timeout,

    /// Data block was not acknowledged (1-based block ordinal).
    #[error("block {0} not acknowledged")]
    BlockNotAcked(u32),

    /// Channel failed while reading or writing.
    #[error("channel closed")]
    ChannelClosed,

    /// Transfer interrupted by the embedding application.
    #[error("transfer cancelled")]
    Cancelled,
}
