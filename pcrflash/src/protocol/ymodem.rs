//! YMODEM file transfer (sender side, 128-byte blocks, CRC-16).
//!
//! This module implements the YMODEM sender used by the EasyPCR boot loader
//! for firmware upgrades.
//!
//! ## Frame Format
//!
//! ```text
//! +-----+-----+-----------+---------------+--------+
//! | SOH | SEQ | 255 - SEQ |  DATA (128)   | CRC16  |
//! +-----+-----+-----------+---------------+--------+
//! | 1   | 1   | 1         |     128       | 2 (BE) |
//! +-----+-----+-----------+---------------+--------+
//! ```
//!
//! The CRC covers the 128 data bytes only.
//!
//! ## Session
//!
//! ```text
//! receiver            sender
//!    C  ------------>
//!       <------------  block 0 (name NUL size)
//!    ACK C --------->
//!       <------------  block 1..N (0x1A padded)
//!    ACK ----------->  (per block)
//!       <------------  EOT
//!    ACK C --------->
//!       <------------  block 0 (all zero, end of batch)
//!    ACK ----------->
//! ```
//!
//! Every wait is bounded and nothing is retried: a missing or wrong reply
//! ends the session, and the sender then writes two CAN bytes.
//!
//! The protocol logic lives in [`transition`], a pure function of
//! `(state, input)`. [`YmodemSender`] only feeds it channel events.

use crate::checksum::crc16_xmodem;
use crate::error::{Result, TransferError};
use crate::port::Port;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// YMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// Padding for the last data block (SUB).
    pub const PAD: u8 = 0x1A;
    /// CRC mode request character.
    pub const C: u8 = b'C';
}

/// Payload size of every block.
pub const BLOCK_SIZE: usize = 128;

/// Size of an encoded frame: marker, sequence, complement, payload, CRC.
pub const FRAME_SIZE: usize = 3 + BLOCK_SIZE + 2;

/// Longest file name placed in the header block, in bytes.
pub const MAX_FILE_NAME_LEN: usize = 64;

/// YMODEM timing options.
#[derive(Debug, Clone)]
pub struct YmodemConfig {
    /// Timeout for the receiver's initial 'C'.
    pub ready_timeout: Duration,
    /// Timeout for every later reply byte.
    pub ack_timeout: Duration,
    /// Length of each short read while waiting for a byte.
    pub poll_interval: Duration,
}

impl Default for YmodemConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Number of data blocks needed for `len` bytes.
pub fn block_count(len: usize) -> u32 {
    len.div_ceil(BLOCK_SIZE) as u32
}

/// Wire sequence number of the 1-based data block `ordinal`.
pub fn block_sequence(ordinal: u32) -> u8 {
    (ordinal % 256) as u8
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBlock {
    /// Sequence number (wraps modulo 256).
    pub block_number: u8,
    /// Exactly one block of payload.
    pub payload: [u8; BLOCK_SIZE],
}

impl TransferBlock {
    /// Header block: file name (truncated to 64 bytes), NUL, decimal size,
    /// zero padded.
    pub fn header(file_name: &str, file_size: usize) -> Self {
        let mut payload = [0u8; BLOCK_SIZE];
        let name = &file_name.as_bytes()[..file_name.len().min(MAX_FILE_NAME_LEN)];
        payload[..name.len()].copy_from_slice(name);

        let size = file_size.to_string();
        let start = name.len() + 1;
        payload[start..start + size.len()].copy_from_slice(size.as_bytes());

        Self {
            block_number: 0,
            payload,
        }
    }

    /// All-zero block 0 that ends the batch.
    pub fn end_of_batch() -> Self {
        Self {
            block_number: 0,
            payload: [0u8; BLOCK_SIZE],
        }
    }

    /// Data block `ordinal` (1-based) carrying `chunk`, padded with SUB.
    pub fn data(ordinal: u32, chunk: &[u8]) -> Self {
        let mut payload = [control::PAD; BLOCK_SIZE];
        let len = chunk.len().min(BLOCK_SIZE);
        payload[..len].copy_from_slice(&chunk[..len]);

        Self {
            block_number: block_sequence(ordinal),
            payload,
        }
    }

    /// Complement byte. Always `255 - block_number`.
    pub fn complement(&self) -> u8 {
        u8::MAX - self.block_number
    }

    /// CRC-16/XMODEM of the payload.
    pub fn crc16(&self) -> u16 {
        crc16_xmodem(&self.payload)
    }

    /// Encode to the 133-byte wire frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_SIZE];
        frame[0] = control::SOH;
        frame[1] = self.block_number;
        frame[2] = self.complement();
        frame[3..3 + BLOCK_SIZE].copy_from_slice(&self.payload);
        BigEndian::write_u16(&mut frame[FRAME_SIZE - 2..], self.crc16());
        frame
    }

    /// Decode a wire frame, checking marker, complement and CRC.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() != FRAME_SIZE || frame[0] != control::SOH {
            return None;
        }
        let block_number = frame[1];
        if frame[2] != u8::MAX - block_number {
            return None;
        }

        let mut payload = [0u8; BLOCK_SIZE];
        payload.copy_from_slice(&frame[3..3 + BLOCK_SIZE]);
        let crc = BigEndian::read_u16(&frame[FRAME_SIZE - 2..]);

        let block = Self {
            block_number,
            payload,
        };
        (block.crc16() == crc).then_some(block)
    }
}

/// Sender state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Waiting for the receiver's first 'C'.
    AwaitInitialReady,
    /// Header block is to be written.
    SendHeader,
    /// Waiting for the header ACK.
    AwaitHeaderAck,
    /// Waiting for the 'C' that requests data.
    AwaitHeaderCrc,
    /// Data block `n` (1-based) is to be written.
    SendData(u32),
    /// Waiting for the ACK of data block `n`.
    AwaitDataAck(u32),
    /// EOT is to be written.
    SendEot,
    /// Waiting for the EOT ACK.
    AwaitEotAck,
    /// Waiting for the 'C' that requests the closing header.
    AwaitFinalCrc,
    /// End-of-batch block is to be written.
    SendFinalHeader,
    /// Waiting for the end-of-batch ACK.
    AwaitFinalAck,
    /// Session completed.
    Succeeded,
    /// Session failed.
    Failed(TransferError),
}

impl State {
    /// Whether the session has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

/// Event reported by the channel for the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// Requested write completed.
    Written,
    /// A byte arrived.
    Byte(u8),
    /// No byte arrived before the deadline.
    TimedOut,
    /// Read or write failed.
    ChannelClosed,
    /// Caller asked to stop.
    Interrupted,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Data acknowledged. Carries the cumulative acknowledged bytes.
    ///
    /// The report for the last block is held back until the end-of-batch
    /// block is acknowledged, so `acknowledged == total_len` means success.
    Progress {
        /// Bytes confirmed by the receiver so far.
        acknowledged: usize,
    },
    /// Session failed. Signal cancellation to the receiver.
    Cancel,
}

/// Which timeout applies to a byte wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Session start.
    Ready,
    /// Any reply after the session started.
    Reply,
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write these bytes, then report [`Input::Written`].
    Write(Vec<u8>),
    /// Wait for one byte.
    ReadByte(Wait),
    /// Session ended.
    Done,
}

/// Session outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Still running.
    Pending,
    /// Receiver acknowledged the whole session.
    Succeeded,
    /// Session failed.
    Failed(TransferError),
    /// Caller interrupted the session.
    Cancelled,
}

fn fail(reason: TransferError) -> (State, Option<Effect>) {
    (State::Failed(reason), Some(Effect::Cancel))
}

/// Advance the state machine by one input.
///
/// `total_len` is the payload length of the session.
pub fn transition(state: &State, input: Input, total_len: usize) -> (State, Option<Effect>) {
    let total_blocks = block_count(total_len);

    match (state, input) {
        (State::Succeeded | State::Failed(_), _) => (state.clone(), None),
        (_, Input::ChannelClosed) => fail(TransferError::ChannelClosed),
        (_, Input::Interrupted) => fail(TransferError::Cancelled),

        (State::AwaitInitialReady, Input::Byte(control::C)) => (State::SendHeader, None),
        (State::AwaitInitialReady, _) => fail(TransferError::NoCrcRequest),

        (State::SendHeader, Input::Written) => (State::AwaitHeaderAck, None),
        (State::AwaitHeaderAck, Input::Byte(control::ACK)) => (State::AwaitHeaderCrc, None),
        (State::AwaitHeaderCrc, Input::Byte(control::C)) => {
            if total_blocks == 0 {
                (State::SendEot, None)
            } else {
                (State::SendData(1), None)
            }
        },

        (State::SendData(n), Input::Written) => (State::AwaitDataAck(*n), None),
        (State::AwaitDataAck(n), Input::Byte(control::ACK)) => {
            if *n >= total_blocks {
                (State::SendEot, None)
            } else {
                let acknowledged = *n as usize * BLOCK_SIZE;
                (State::SendData(n + 1), Some(Effect::Progress { acknowledged }))
            }
        },
        (State::AwaitDataAck(n), _) => fail(TransferError::BlockNotAcked(*n)),

        (State::SendEot, Input::Written) => (State::AwaitEotAck, None),
        (State::AwaitEotAck, Input::Byte(control::ACK)) => (State::AwaitFinalCrc, None),
        (State::AwaitFinalCrc, Input::Byte(control::C)) => (State::SendFinalHeader, None),
        (State::SendFinalHeader, Input::Written) => (State::AwaitFinalAck, None),
        (State::AwaitFinalAck, Input::Byte(control::ACK)) => {
            let effect = (total_len > 0).then_some(Effect::Progress {
                acknowledged: total_len,
            });
            (State::Succeeded, effect)
        },

        (
            State::AwaitHeaderAck
            | State::AwaitHeaderCrc
            | State::AwaitEotAck
            | State::AwaitFinalCrc
            | State::AwaitFinalAck,
            _,
        ) => fail(TransferError::Timeout),

        // Write states only move on once the write completed.
        (State::SendHeader | State::SendData(_) | State::SendEot | State::SendFinalHeader, _) => {
            (state.clone(), None)
        },
    }
}

/// Ephemeral state of one send.
#[derive(Debug)]
pub struct TransferSession<'a> {
    data: &'a [u8],
    file_name: &'a str,
    acknowledged: usize,
    state: State,
}

impl<'a> TransferSession<'a> {
    /// Start a session for `data` announced as `file_name`.
    pub fn new(data: &'a [u8], file_name: &'a str) -> Self {
        Self {
            data,
            file_name,
            acknowledged: 0,
            state: State::AwaitInitialReady,
        }
    }

    /// Current state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Payload length.
    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    /// Number of data blocks.
    pub fn total_blocks(&self) -> u32 {
        block_count(self.data.len())
    }

    /// Bytes reported as acknowledged so far. Reaches `total_len` only once
    /// the session succeeded.
    pub fn acknowledged(&self) -> usize {
        self.acknowledged
    }

    /// Current block ordinal (1-based), if a data block is in flight.
    pub fn current_block(&self) -> Option<u32> {
        match self.state {
            State::SendData(n) | State::AwaitDataAck(n) => Some(n),
            _ => None,
        }
    }

    /// Session outcome so far.
    pub fn outcome(&self) -> Outcome {
        match self.state {
            State::Succeeded => Outcome::Succeeded,
            State::Failed(TransferError::Cancelled) => Outcome::Cancelled,
            State::Failed(reason) => Outcome::Failed(reason),
            _ => Outcome::Pending,
        }
    }

    /// Next thing the driver has to do.
    pub fn action(&self) -> Action {
        match self.state {
            State::AwaitInitialReady => Action::ReadByte(Wait::Ready),
            State::AwaitHeaderAck
            | State::AwaitHeaderCrc
            | State::AwaitDataAck(_)
            | State::AwaitEotAck
            | State::AwaitFinalCrc
            | State::AwaitFinalAck => Action::ReadByte(Wait::Reply),
            State::SendHeader => {
                Action::Write(TransferBlock::header(self.file_name, self.data.len()).encode())
            },
            State::SendData(n) => {
                let start = (n as usize - 1) * BLOCK_SIZE;
                let end = (start + BLOCK_SIZE).min(self.data.len());
                Action::Write(TransferBlock::data(n, &self.data[start..end]).encode())
            },
            State::SendEot => Action::Write(vec![control::EOT]),
            State::SendFinalHeader => Action::Write(TransferBlock::end_of_batch().encode()),
            State::Succeeded | State::Failed(_) => Action::Done,
        }
    }

    /// Feed one input and return the requested side effect.
    pub fn advance(&mut self, input: Input) -> Option<Effect> {
        let (next, effect) = transition(&self.state, input, self.data.len());
        trace!("{:?} + {:?} -> {:?}", self.state, input, next);
        if let Some(Effect::Progress { acknowledged }) = effect {
            self.acknowledged = acknowledged;
        }
        self.state = next;
        effect
    }

    /// Final result. `Ok` only once the session succeeded.
    pub fn result(&self) -> std::result::Result<(), TransferError> {
        match self.state {
            State::Succeeded => Ok(()),
            State::Failed(reason) => Err(reason),
            _ => Err(TransferError::Timeout),
        }
    }
}

/// Progress report passed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress<'a> {
    /// Index of the file within the batch. Always 0, batches hold one file.
    pub file_index: usize,
    /// Announced file name.
    pub file_name: &'a str,
    /// Payload length.
    pub total_bytes: usize,
    /// Bytes confirmed by the receiver.
    pub acknowledged: usize,
}

impl TransferProgress<'_> {
    /// Completion percentage (0-100).
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            100
        } else {
            (self.acknowledged * 100 / self.total_bytes) as u8
        }
    }
}

/// YMODEM sender driving a [`TransferSession`] over a [`Port`].
pub struct YmodemSender<'a, P: Port> {
    port: &'a mut P,
    config: YmodemConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, P: Port> YmodemSender<'a, P> {
    /// Create a new sender with default timing.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: YmodemConfig::default(),
            cancel: None,
        }
    }

    /// Create a new sender with custom timing.
    pub fn with_config(port: &'a mut P, config: YmodemConfig) -> Self {
        Self {
            port,
            config,
            cancel: None,
        }
    }

    /// Stop the session at the next wait once `flag` becomes `true`.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancel_requested(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Wait up to `timeout` for one byte using short polls.
    fn wait_for_byte(&mut self, timeout: Duration) -> Input {
        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel_requested() {
                return Input::Interrupted;
            }
            let now = Instant::now();
            if now >= deadline {
                return Input::TimedOut;
            }

            let slice = self.config.poll_interval.min(deadline - now);
            match self.port.read_bytes(1, slice) {
                Ok(bytes) => {
                    if let Some(&byte) = bytes.first() {
                        trace!("Received 0x{byte:02X}");
                        return Input::Byte(byte);
                    }
                },
                Err(e) => {
                    debug!("Read failed: {e}");
                    return Input::ChannelClosed;
                },
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Input {
        match self.port.write_bytes(bytes) {
            Ok(()) => Input::Written,
            Err(e) => {
                debug!("Write failed: {e}");
                Input::ChannelClosed
            },
        }
    }

    /// Best-effort cancel signal. Failures are only logged.
    fn send_cancel(&mut self) {
        if let Err(e) = self.port.write_bytes(&[control::CAN, control::CAN]) {
            warn!("Failed to send cancel signal: {e}");
        }
    }

    /// Send `data` as `file_name`.
    ///
    /// `on_progress` runs once per data block with the cumulative
    /// acknowledged byte count. The final report, equal to `data.len()`,
    /// only arrives after the receiver confirmed the whole session.
    pub fn send_file<F>(
        &mut self,
        data: &[u8],
        file_name: &str,
        mut on_progress: F,
    ) -> std::result::Result<(), TransferError>
    where
        F: FnMut(&TransferProgress<'_>),
    {
        debug!(
            "Starting YMODEM transfer on {}: {} ({} bytes, {} blocks)",
            self.port.name(),
            file_name,
            data.len(),
            block_count(data.len())
        );

        let mut session = TransferSession::new(data, file_name);
        debug!("Waiting for 'C' from receiver...");

        loop {
            let input = match session.action() {
                Action::Write(bytes) => self.write(&bytes),
                Action::ReadByte(Wait::Ready) => self.wait_for_byte(self.config.ready_timeout),
                Action::ReadByte(Wait::Reply) => self.wait_for_byte(self.config.ack_timeout),
                Action::Done => break,
            };

            match session.advance(input) {
                Some(Effect::Progress { acknowledged }) => on_progress(&TransferProgress {
                    file_index: 0,
                    file_name,
                    total_bytes: data.len(),
                    acknowledged,
                }),
                Some(Effect::Cancel) => self.send_cancel(),
                None => {},
            }

            match session.state() {
                State::SendHeader => debug!("Received 'C', sending header block"),
                State::SendEot => debug!("All data blocks acknowledged, sending EOT"),
                State::SendFinalHeader => debug!("Sending end-of-batch block"),
                _ => {},
            }
        }

        match session.result() {
            Ok(()) => {
                debug!("YMODEM transfer complete");
                Ok(())
            },
            Err(e) => {
                debug!(
                    "YMODEM transfer failed after {} of {} bytes: {e}",
                    session.acknowledged(),
                    session.total_len()
                );
                Err(e)
            },
        }
    }
}

/// Send `data` over `port` with `config`.
pub fn send_file<P, F>(
    port: &mut P,
    config: &YmodemConfig,
    data: &[u8],
    file_name: &str,
    on_progress: F,
) -> Result<()>
where
    P: Port,
    F: FnMut(&TransferProgress<'_>),
{
    YmodemSender::with_config(port, config.clone())
        .send_file(data, file_name, on_progress)
        .map_err(Into::into)
}
