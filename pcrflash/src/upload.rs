//! Firmware upgrade workflow.
//!
//! Ties firmware loading and the YMODEM sender together: the device boot
//! loader is expected to be waiting for a YMODEM transfer on the port.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pcrflash::{Firmware, NativePort, SerialConfig, Uploader};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let firmware = Firmware::from_file("easypcr.hex")?;
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!
//!     let mut uploader = Uploader::new(port);
//!     uploader.upload(&firmware, |p| println!("{}%", p.percent()))?;
//!     Ok(())
//! }
//! ```

use crate::error::Result;
use crate::image::Firmware;
use crate::port::Port;
use crate::protocol::ymodem::{TransferProgress, YmodemConfig, YmodemSender};
use log::{error, info};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Uploads firmware images over a port.
pub struct Uploader<P: Port> {
    port: P,
    config: YmodemConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl<P: Port> Uploader<P> {
    /// Create an uploader with default transfer timing.
    pub fn new(port: P) -> Self {
        Self {
            port,
            config: YmodemConfig::default(),
            cancel: None,
        }
    }

    /// Set transfer timing.
    #[must_use]
    pub fn with_config(mut self, config: YmodemConfig) -> Self {
        self.config = config;
        self
    }

    /// Abort the transfer once `flag` becomes `true`.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the uploader and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Send `firmware` to the boot loader.
    pub fn upload<F>(&mut self, firmware: &Firmware, on_progress: F) -> Result<()>
    where
        F: FnMut(&TransferProgress<'_>),
    {
        info!(
            "Uploading {} ({}, {} bytes) via {}",
            firmware.name,
            firmware.format,
            firmware.image.len(),
            self.port.name()
        );

        let mut sender = YmodemSender::with_config(&mut self.port, self.config.clone());
        if let Some(flag) = &self.cancel {
            sender = sender.with_cancel_flag(Arc::clone(flag));
        }

        match sender.send_file(firmware.payload(), &firmware.name, on_progress) {
            Ok(()) => {
                info!("Firmware uploaded");
                Ok(())
            },
            Err(e) => {
                error!("Firmware transfer failed: {e}");
                Err(e.into())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, TransferError};
    use crate::protocol::ymodem::{TransferBlock, control};
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Receiver that ACKs everything and requests CRC where YMODEM expects it.
    #[derive(Default)]
    struct AckAll {
        pending: VecDeque<u8>,
        writes: Vec<Vec<u8>>,
    }

    impl Port for AckAll {
        fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
            self.writes.push(bytes.to_vec());
            let header_or_eot = self.writes.len() == 1 || bytes == [control::EOT];
            self.pending.push_back(control::ACK);
            if header_or_eot {
                self.pending.push_back(control::C);
            }
            Ok(())
        }

        fn read_bytes(&mut self, _max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
            match self.pending.pop_front() {
                Some(byte) => Ok(vec![byte]),
                None => {
                    std::thread::sleep(timeout);
                    Ok(Vec::new())
                },
            }
        }

        fn name(&self) -> &str {
            "ack-all"
        }
    }

    fn fast_config() -> YmodemConfig {
        YmodemConfig {
            ready_timeout: Duration::from_millis(50),
            ack_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_upload_hex_firmware_sends_flattened_image() {
        let hex = ":02000000AAAAAA\n:02000400BBBB84\n:00000001FF\n";
        let firmware = Firmware::from_bytes("app.hex", hex.as_bytes().to_vec()).unwrap();

        let port = AckAll {
            pending: VecDeque::from([control::C]),
            ..AckAll::default()
        };
        let mut uploader = Uploader::new(port).with_config(fast_config());

        let mut last = None;
        uploader
            .upload(&firmware, |p| last = Some((p.acknowledged, p.total_bytes)))
            .unwrap();
        assert_eq!(last, Some((6, 6)));

        let port = uploader.into_port();
        assert_eq!(
            TransferBlock::decode(&port.writes[0]),
            Some(TransferBlock::header("app.hex", 6))
        );
        let data = TransferBlock::decode(&port.writes[1]).unwrap();
        assert_eq!(&data.payload[..6], &[0xAA, 0xAA, 0xFF, 0xFF, 0xBB, 0xBB]);
    }

    #[test]
    fn test_upload_reports_transfer_error() {
        let firmware = Firmware::from_bytes("app.bin", vec![1, 2, 3]).unwrap();
        let mut uploader = Uploader::new(AckAll::default()).with_config(fast_config());

        let err = uploader.upload(&firmware, |_| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::Transfer(TransferError::NoCrcRequest)
        ));
    }

    #[test]
    fn test_upload_honours_cancel_flag() {
        let firmware = Firmware::from_bytes("app.bin", vec![0u8; 64]).unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let port = AckAll {
            pending: VecDeque::from([control::C]),
            ..AckAll::default()
        };
        let mut uploader = Uploader::new(port)
            .with_config(fast_config())
            .with_cancel_flag(flag);

        let err = uploader.upload(&firmware, |_| {}).unwrap_err();
        assert!(matches!(err, Error::Transfer(TransferError::Cancelled)));
        assert_eq!(
            uploader.port_mut().writes,
            vec![vec![control::CAN, control::CAN]]
        );
    }
}
