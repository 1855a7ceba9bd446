//! Firmware files as upload payloads.
//!
//! A firmware file is either Intel HEX text, which is flattened with
//! [`decode`](super::ihex::decode), or a raw binary that is sent as is.

use crate::error::{Error, Result};
use crate::image::ihex::{self, BinaryImage};
use log::debug;
use std::fs;
use std::path::Path;

/// Source format of a firmware file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum FirmwareFormat {
    /// Intel HEX text.
    IntelHex,
    /// Raw binary.
    Binary,
}

impl std::fmt::Display for FirmwareFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IntelHex => write!(f, "Intel HEX"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Firmware ready for transfer.
#[derive(Debug, Clone)]
pub struct Firmware {
    /// File name announced to the receiver.
    pub name: String,
    /// Format the image was loaded from.
    pub format: FirmwareFormat,
    /// Flattened image.
    pub image: BinaryImage,
}

impl Firmware {
    /// Load a firmware file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidFirmware(format!("{} is not a file", path.display())))?;

        let bytes = fs::read(path)?;
        Self::from_bytes(name, bytes)
    }

    /// Build firmware from file contents.
    ///
    /// A `.hex` name forces HEX decoding. Other names are decoded as HEX
    /// only when the content starts with a valid record.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let name = name.into();
        if bytes.is_empty() {
            return Err(Error::InvalidFirmware(format!("{name} is empty")));
        }

        let hex_name = Path::new(&name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("hex"));

        let (format, image) = match String::from_utf8(bytes) {
            Ok(text) if hex_name || ihex::looks_like_hex(&text) => {
                (FirmwareFormat::IntelHex, ihex::decode(&text)?)
            },
            Ok(text) => (FirmwareFormat::Binary, BinaryImage::new(text.into_bytes(), 0)),
            Err(_) if hex_name => {
                return Err(Error::InvalidFirmware(format!(
                    "{name} is not valid Intel HEX text"
                )));
            },
            Err(e) => (FirmwareFormat::Binary, BinaryImage::new(e.into_bytes(), 0)),
        };

        debug!(
            "Loaded {name} as {format}: {} bytes at 0x{:08X}",
            image.len(),
            image.base_offset()
        );

        Ok(Self {
            name,
            format,
            image,
        })
    }

    /// Payload sent over the wire.
    pub fn payload(&self) -> &[u8] {
        self.image.data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;

    const HEX: &str = ":020000040001F9\n:0400100001020304E2\n:00000001FF\n";

    #[test]
    fn test_hex_extension_decodes() {
        let fw = Firmware::from_bytes("APP.HEX", HEX.as_bytes().to_vec()).unwrap();
        assert_eq!(fw.format, FirmwareFormat::IntelHex);
        assert_eq!(fw.image.base_offset(), 0x0001_0010);
        assert_eq!(fw.payload(), &[1, 2, 3, 4]);
        assert_eq!(fw.name, "APP.HEX");
    }

    #[test]
    fn test_hex_content_detected_without_extension() {
        let fw = Firmware::from_bytes("app.txt", HEX.as_bytes().to_vec()).unwrap();
        assert_eq!(fw.format, FirmwareFormat::IntelHex);
    }

    #[test]
    fn test_binary_passthrough() {
        let bytes = vec![0x00, 0xFF, 0x10, 0x80];
        let fw = Firmware::from_bytes("app.bin", bytes.clone()).unwrap();
        assert_eq!(fw.format, FirmwareFormat::Binary);
        assert_eq!(fw.image.base_offset(), 0);
        assert_eq!(fw.payload(), bytes.as_slice());
    }

    #[test]
    fn test_text_binary_passthrough() {
        let fw = Firmware::from_bytes("notes.bin", b"hello".to_vec()).unwrap();
        assert_eq!(fw.format, FirmwareFormat::Binary);
        assert_eq!(fw.payload(), b"hello");
    }

    #[test]
    fn test_corrupt_hex_is_rejected() {
        let corrupt = HEX.replace("E2", "E3");
        let err = Firmware::from_bytes("app.hex", corrupt.into_bytes()).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::ChecksumMismatch { line: 2, .. })
        ));
    }

    #[test]
    fn test_non_utf8_hex_is_rejected() {
        let err = Firmware::from_bytes("app.hex", vec![0xC3, 0x28]).unwrap_err();
        assert!(matches!(err, Error::InvalidFirmware(_)));
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let err = Firmware::from_bytes("app.bin", Vec::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidFirmware(_)));
    }

    #[test]
    fn test_from_missing_file() {
        let err = Firmware::from_file("/nonexistent/firmware.hex").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
