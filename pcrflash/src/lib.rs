//! # pcrflash
//!
//! Firmware delivery for EasyPCR controllers over a serial link.
//!
//! This crate provides:
//!
//! - Intel HEX decoding into a contiguous binary image
//! - YMODEM file transfer (128-byte blocks, CRC-16)
//! - CRC16-XMODEM and HEX record checksum calculation
//! - A serial port implementation of the transfer channel
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use pcrflash::Firmware;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Decode a HEX file (raw binaries are used as is)
//!     let firmware = Firmware::from_file("easypcr.hex")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         use pcrflash::{NativePort, SerialConfig, Uploader};
//!
//!         let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!         let mut uploader = Uploader::new(port);
//!         uploader.upload(&firmware, |p| {
//!             println!("{}: {}/{}", p.file_name, p.acknowledged, p.total_bytes);
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod upload;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    checksum::{crc16_xmodem, hex_record_checksum},
    error::{Error, FormatError, Result, TransferError},
    image::{BinaryImage, Firmware, FirmwareFormat, HexRecord, RecordType},
    port::{DataBits, FlowControl, Parity, Port, SerialConfig, StopBits},
    protocol::ymodem::{Outcome, TransferBlock, TransferProgress, YmodemConfig, YmodemSender},
    upload::Uploader,
};
