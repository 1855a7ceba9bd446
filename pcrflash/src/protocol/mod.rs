//! Protocol implementations.

pub mod ymodem;

// Re-export common types
pub use ymodem::{TransferProgress, YmodemConfig, YmodemSender};
