//! Duplex channel abstraction for the transfer layer.
//!
//! The YMODEM sender never opens or closes a link. It is handed something
//! implementing [`Port`] and assumes exclusive access to it for the whole
//! session.
//!
//! ```text
//! +------------------+
//! |  YmodemSender    |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |    Port trait    |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | NativePort       |
//! |  (serialport)    |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use pcrflash::port::Port;
//! use std::time::Duration;
//!
//! fn ping<P: Port>(port: &mut P) -> pcrflash::Result<bool> {
//!     port.write_bytes(b"?")?;
//!     let reply = port.read_bytes(1, Duration::from_millis(100))?;
//!     Ok(!reply.is_empty())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Default read/write timeout.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(100),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Bidirectional byte channel consumed by the protocol layer.
pub trait Port: Send {
    /// Write all bytes.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read up to `max_len` bytes.
    ///
    /// Returns fewer bytes, possibly none, once `timeout` elapses. Must not
    /// block past `timeout`.
    fn read_bytes(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Port name/path, for log messages.
    fn name(&self) -> &str;
}

impl<P: Port + ?Sized> Port for &mut P {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_bytes(bytes)
    }

    fn read_bytes(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read_bytes(max_len, timeout)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_bytes(bytes)
    }

    fn read_bytes(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read_bytes(max_len, timeout)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 57600).with_timeout(Duration::from_secs(5));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    struct Loopback(Vec<u8>);

    impl Port for Loopback {
        fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
            self.0.extend_from_slice(bytes);
            Ok(())
        }

        fn read_bytes(&mut self, max_len: usize, _timeout: Duration) -> Result<Vec<u8>> {
            let n = max_len.min(self.0.len());
            Ok(self.0.drain(..n).collect())
        }

        fn name(&self) -> &str {
            "loopback"
        }
    }

    fn write_via<P: Port>(mut port: P, bytes: &[u8]) -> String {
        port.write_bytes(bytes).unwrap();
        port.name().to_string()
    }

    #[test]
    fn test_port_forwarding_through_references() {
        let mut inner = Loopback(Vec::new());
        assert_eq!(write_via(&mut inner, &[1, 2, 3]), "loopback");

        let mut boxed: Box<dyn Port> = Box::new(inner);
        assert_eq!(boxed.read_bytes(2, Duration::ZERO).unwrap(), vec![1, 2]);
        assert_eq!(boxed.read_bytes(8, Duration::ZERO).unwrap(), vec![3]);
        assert!(boxed.read_bytes(8, Duration::ZERO).unwrap().is_empty());
    }
}
