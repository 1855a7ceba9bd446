//! Firmware image formats.

pub mod firmware;
pub mod ihex;

pub use firmware::{Firmware, FirmwareFormat};
pub use ihex::{BinaryImage, HexRecord, RecordType, decode, looks_like_hex};
