//! Framed serial protocol.
//!
//! ```text
//! [0xAA][TYPE:1][LENGTH:1][DATA:LENGTH][CHECKSUM:1][0x55]
//! ```
//!
//! `CHECKSUM` is the XOR of the start byte, type, length and every data byte.
//! Frames are reassembled one byte at a time by [`FrameParser`]; any framing
//! violation drops the frame and returns to hunting for a start byte. The
//! sender is expected to retransmit the whole frame.

use core::fmt;

pub mod message;

pub use message::{ConfigCommand, ConfigParam, ManualCommand, Message, MessageError};

use crate::status::SystemState;

/// First byte of every frame.
pub const START_BYTE: u8 = 0xAA;
/// Last byte of every frame.
pub const END_BYTE: u8 = 0x55;
/// Number of target bytes the receive buffer holds.
pub const PULSE_CAPACITY: usize = 16_383;
/// Largest payload the one-byte LENGTH field can describe.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;
/// Start, type, length, checksum and end bytes.
pub const FRAME_OVERHEAD: usize = 5;

/// Frame type carried in the TYPE byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageType {
    /// Shot target table.
    PwmTable,
    /// Static switch pattern.
    Manual,
    /// Runtime parameter update.
    Config,
}

impl MessageType {
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(MessageType::PwmTable),
            0x02 => Some(MessageType::Manual),
            0x03 => Some(MessageType::Config),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            MessageType::PwmTable => 0x01,
            MessageType::Manual => 0x02,
            MessageType::Config => 0x03,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageType::PwmTable => "pwm",
            MessageType::Manual => "manual",
            MessageType::Config => "config",
        };
        f.write_str(label)
    }
}

/// Reason a frame was discarded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameError {
    /// TYPE byte outside 0x01..=0x03.
    BadType(u8),
    /// CHECKSUM byte did not match the running XOR.
    ChecksumMismatch { expected: u8, received: u8 },
    /// Byte after the checksum was not the end marker.
    MissingEnd(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::BadType(byte) => write!(f, "bad type 0x{byte:02x}"),
            FrameError::ChecksumMismatch { expected, received } => write!(
                f,
                "checksum mismatch (expected 0x{expected:02x}, received 0x{received:02x})"
            ),
            FrameError::MissingEnd(byte) => write!(f, "missing end byte (got 0x{byte:02x})"),
        }
    }
}

/// Parser position. Each variant carries only what the next byte needs.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum FrameState {
    #[default]
    WaitStart,
    WaitType {
        checksum: u8,
    },
    WaitLength {
        kind: MessageType,
        checksum: u8,
    },
    WaitData {
        kind: MessageType,
        expected: u8,
        index: usize,
        checksum: u8,
    },
    WaitChecksum {
        kind: MessageType,
        expected: u8,
        checksum: u8,
    },
    WaitEnd {
        kind: MessageType,
        expected: u8,
    },
}

/// Side effect produced by a single byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameEvent {
    /// Nothing to do (also returned for noise between frames).
    None,
    /// A start byte opened a new frame.
    Started,
    /// Data byte for `buffer[index]`.
    Store { index: usize, byte: u8 },
    /// Data byte past the buffer capacity; checksummed but not stored.
    Dropped { index: usize },
    /// End byte accepted; the frame carried `length` data bytes.
    Completed { kind: MessageType, length: usize },
    /// Frame discarded; the parser is back in [`FrameState::WaitStart`].
    Rejected(FrameError),
}

impl FrameEvent {
    /// System state implied by the event, if it changes it.
    #[must_use]
    pub const fn system_state(&self) -> Option<SystemState> {
        match self {
            FrameEvent::Started => Some(SystemState::Receiving),
            FrameEvent::Completed { .. } => Some(SystemState::DataReady),
            FrameEvent::Rejected(_) => Some(SystemState::Idle),
            FrameEvent::None | FrameEvent::Store { .. } | FrameEvent::Dropped { .. } => None,
        }
    }
}

/// Advances the parser by one byte.
///
/// `capacity` is the size of the receive buffer; data bytes at or beyond it
/// are reported as [`FrameEvent::Dropped`].
#[must_use]
pub const fn step(state: FrameState, byte: u8, capacity: usize) -> (FrameState, FrameEvent) {
    match state {
        FrameState::WaitStart => {
            if byte == START_BYTE {
                (
                    FrameState::WaitType {
                        checksum: START_BYTE,
                    },
                    FrameEvent::Started,
                )
            } else {
                (FrameState::WaitStart, FrameEvent::None)
            }
        }
        FrameState::WaitType { checksum } => match MessageType::from_byte(byte) {
            Some(kind) => (
                FrameState::WaitLength {
                    kind,
                    checksum: checksum ^ byte,
                },
                FrameEvent::None,
            ),
            None => (
                FrameState::WaitStart,
                FrameEvent::Rejected(FrameError::BadType(byte)),
            ),
        },
        FrameState::WaitLength { kind, checksum } => {
            let checksum = checksum ^ byte;
            let next = if byte > 0 {
                FrameState::WaitData {
                    kind,
                    expected: byte,
                    index: 0,
                    checksum,
                }
            } else {
                FrameState::WaitChecksum {
                    kind,
                    expected: 0,
                    checksum,
                }
            };
            (next, FrameEvent::None)
        }
        FrameState::WaitData {
            kind,
            expected,
            index,
            checksum,
        } => {
            let checksum = checksum ^ byte;
            let event = if index < capacity {
                FrameEvent::Store { index, byte }
            } else {
                FrameEvent::Dropped { index }
            };
            let index = index + 1;
            let next = if index >= expected as usize {
                FrameState::WaitChecksum {
                    kind,
                    expected,
                    checksum,
                }
            } else {
                FrameState::WaitData {
                    kind,
                    expected,
                    index,
                    checksum,
                }
            };
            (next, event)
        }
        FrameState::WaitChecksum {
            kind,
            expected,
            checksum,
        } => {
            if byte == checksum {
                (FrameState::WaitEnd { kind, expected }, FrameEvent::None)
            } else {
                (
                    FrameState::WaitStart,
                    FrameEvent::Rejected(FrameError::ChecksumMismatch {
                        expected: checksum,
                        received: byte,
                    }),
                )
            }
        }
        FrameState::WaitEnd { kind, expected } => {
            if byte == END_BYTE {
                (
                    FrameState::WaitStart,
                    FrameEvent::Completed {
                        kind,
                        length: expected as usize,
                    },
                )
            } else {
                (
                    FrameState::WaitStart,
                    FrameEvent::Rejected(FrameError::MissingEnd(byte)),
                )
            }
        }
    }
}

/// Running totals for the serial link.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LinkCounters {
    pub frames_accepted: u32,
    pub bad_type: u32,
    pub checksum_mismatch: u32,
    pub missing_end: u32,
    /// Data bytes that did not fit in the buffer.
    pub overflow_bytes: u32,
    /// Bytes seen while hunting for a start byte.
    pub noise_bytes: u32,
}

impl LinkCounters {
    /// Frames discarded for any framing reason.
    #[must_use]
    pub const fn framing_errors(&self) -> u32 {
        self.bad_type
            .saturating_add(self.checksum_mismatch)
            .saturating_add(self.missing_end)
    }

    fn record(&mut self, event: &FrameEvent, byte_was_noise: bool) {
        match event {
            FrameEvent::Completed { .. } => {
                self.frames_accepted = self.frames_accepted.wrapping_add(1);
            }
            FrameEvent::Rejected(FrameError::BadType(_)) => {
                self.bad_type = self.bad_type.wrapping_add(1);
            }
            FrameEvent::Rejected(FrameError::ChecksumMismatch { .. }) => {
                self.checksum_mismatch = self.checksum_mismatch.wrapping_add(1);
            }
            FrameEvent::Rejected(FrameError::MissingEnd(_)) => {
                self.missing_end = self.missing_end.wrapping_add(1);
            }
            FrameEvent::Dropped { .. } => {
                self.overflow_bytes = self.overflow_bytes.wrapping_add(1);
            }
            FrameEvent::None if byte_was_noise => {
                self.noise_bytes = self.noise_bytes.wrapping_add(1);
            }
            FrameEvent::None | FrameEvent::Started | FrameEvent::Store { .. } => {}
        }
    }
}

/// A completed frame borrowed from the parser's buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Frame<'a> {
    pub kind: MessageType,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Decodes the payload according to the frame type.
    pub fn message(&self) -> Result<Message<'a>, MessageError> {
        Message::decode(self.kind, self.payload)
    }
}

/// Byte-driven frame reassembler owning the pulse buffer.
///
/// Data bytes land in a back buffer that only becomes visible through
/// [`FrameParser::frame`] once its frame passes the checksum and end byte.
pub struct FrameParser<const N: usize = PULSE_CAPACITY> {
    state: FrameState,
    buffers: [[u8; N]; 2],
    /// Index of the buffer holding the last completed frame.
    front: usize,
    received: Option<(MessageType, usize)>,
    counters: LinkCounters,
}

impl<const N: usize> FrameParser<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: FrameState::WaitStart,
            buffers: [[0; N]; 2],
            front: 0,
            received: None,
            counters: LinkCounters {
                frames_accepted: 0,
                bad_type: 0,
                checksum_mismatch: 0,
                missing_end: 0,
                overflow_bytes: 0,
                noise_bytes: 0,
            },
        }
    }

    #[must_use]
    pub const fn state(&self) -> FrameState {
        self.state
    }

    #[must_use]
    pub const fn counters(&self) -> &LinkCounters {
        &self.counters
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Feeds one byte and returns the resulting event.
    pub fn push(&mut self, byte: u8) -> FrameEvent {
        let hunting = matches!(self.state, FrameState::WaitStart);
        let (next, event) = step(self.state, byte, N);
        self.state = next;

        match event {
            FrameEvent::Store { index, byte } => self.buffers[self.front ^ 1][index] = byte,
            FrameEvent::Completed { kind, length } => {
                self.front ^= 1;
                self.received = Some((kind, length.min(N)));
            }
            _ => {}
        }

        self.counters.record(&event, hunting);
        event
    }

    /// Feeds one byte and returns the frame it completed, if any.
    pub fn feed(&mut self, byte: u8) -> Option<Frame<'_>> {
        match self.push(byte) {
            FrameEvent::Completed { .. } => self.frame(),
            _ => None,
        }
    }

    /// Most recently completed frame. Frames that are still arriving or that
    /// were rejected never show through.
    #[must_use]
    pub fn frame(&self) -> Option<Frame<'_>> {
        self.received.map(|(kind, length)| Frame {
            kind,
            payload: &self.buffers[self.front][..length],
        })
    }

    /// Number of data bytes in the last completed frame.
    #[must_use]
    pub fn received_count(&self) -> usize {
        self.received.map_or(0, |(_, length)| length)
    }

    /// Abandons any partial frame.
    pub fn reset(&mut self) {
        self.state = FrameState::WaitStart;
    }
}

impl<const N: usize> Default for FrameParser<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors returned by [`encode_frame`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EncodeError {
    /// Payload longer than the LENGTH byte can express.
    PayloadTooLong { len: usize },
    /// Output slice too small for the whole frame.
    BufferTooSmall { needed: usize },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::PayloadTooLong { len } => write!(
                f,
                "payload of {len} bytes exceeds the {MAX_PAYLOAD_LEN}-byte length field"
            ),
            EncodeError::BufferTooSmall { needed } => {
                write!(f, "output buffer needs {needed} bytes")
            }
        }
    }
}

/// XOR checksum over the header and payload.
#[must_use]
pub fn checksum(kind: MessageType, payload: &[u8]) -> u8 {
    // Callers validate the length; truncation here only affects the checksum
    // of frames that would be rejected anyway.
    #[allow(clippy::cast_possible_truncation)]
    let length = payload.len() as u8;
    payload
        .iter()
        .fold(START_BYTE ^ kind.as_byte() ^ length, |acc, byte| acc ^ byte)
}

/// Writes a complete frame into `out` and returns its length.
pub fn encode_frame(kind: MessageType, payload: &[u8], out: &mut [u8]) -> Result<usize, EncodeError> {
    let len = payload.len();
    let length = u8::try_from(len).map_err(|_| EncodeError::PayloadTooLong { len })?;
    let needed = len + FRAME_OVERHEAD;
    if out.len() < needed {
        return Err(EncodeError::BufferTooSmall { needed });
    }

    out[0] = START_BYTE;
    out[1] = kind.as_byte();
    out[2] = length;
    out[3..3 + len].copy_from_slice(payload);
    out[3 + len] = checksum(kind, payload);
    out[4 + len] = END_BYTE;
    Ok(needed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all<const N: usize>(parser: &mut FrameParser<N>, bytes: &[u8]) -> usize {
        bytes
            .iter()
            .filter(|&&byte| matches!(parser.push(byte), FrameEvent::Completed { .. }))
            .count()
    }

    #[test]
    fn wait_start_ignores_noise() {
        let (state, event) = step(FrameState::WaitStart, 0x13, PULSE_CAPACITY);
        assert_eq!(state, FrameState::WaitStart);
        assert_eq!(event, FrameEvent::None);
    }

    #[test]
    fn start_byte_seeds_checksum() {
        let (state, event) = step(FrameState::WaitStart, START_BYTE, PULSE_CAPACITY);
        assert_eq!(state, FrameState::WaitType { checksum: 0xAA });
        assert_eq!(event, FrameEvent::Started);
        assert_eq!(event.system_state(), Some(SystemState::Receiving));
    }

    #[test]
    fn unknown_type_resynchronises() {
        for byte in [0x00, 0x04, 0xAA, 0xFF] {
            let (state, event) = step(FrameState::WaitType { checksum: 0xAA }, byte, 8);
            assert_eq!(state, FrameState::WaitStart);
            assert_eq!(event, FrameEvent::Rejected(FrameError::BadType(byte)));
        }
    }

    #[test]
    fn zero_length_skips_data() {
        let (state, _) = step(
            FrameState::WaitLength {
                kind: MessageType::Config,
                checksum: 0xAA ^ 0x03,
            },
            0,
            8,
        );
        assert_eq!(
            state,
            FrameState::WaitChecksum {
                kind: MessageType::Config,
                expected: 0,
                checksum: 0xAA ^ 0x03,
            }
        );
    }

    #[test]
    fn last_data_byte_moves_to_checksum() {
        let (state, event) = step(
            FrameState::WaitData {
                kind: MessageType::PwmTable,
                expected: 2,
                index: 1,
                checksum: 0x10,
            },
            0x01,
            8,
        );
        assert_eq!(event, FrameEvent::Store { index: 1, byte: 0x01 });
        assert_eq!(
            state,
            FrameState::WaitChecksum {
                kind: MessageType::PwmTable,
                expected: 2,
                checksum: 0x11,
            }
        );
    }

    #[test]
    fn data_past_capacity_is_dropped_but_checksummed() {
        let (state, event) = step(
            FrameState::WaitData {
                kind: MessageType::PwmTable,
                expected: 6,
                index: 4,
                checksum: 0x00,
            },
            0x7F,
            4,
        );
        assert_eq!(event, FrameEvent::Dropped { index: 4 });
        assert_eq!(
            state,
            FrameState::WaitData {
                kind: MessageType::PwmTable,
                expected: 6,
                index: 5,
                checksum: 0x7F,
            }
        );
    }

    #[test]
    fn end_byte_completes_and_anything_else_rejects() {
        let waiting = FrameState::WaitEnd {
            kind: MessageType::Manual,
            expected: 4,
        };
        assert_eq!(
            step(waiting, END_BYTE, 8),
            (
                FrameState::WaitStart,
                FrameEvent::Completed {
                    kind: MessageType::Manual,
                    length: 4
                }
            )
        );
        assert_eq!(
            step(waiting, 0x56, 8),
            (
                FrameState::WaitStart,
                FrameEvent::Rejected(FrameError::MissingEnd(0x56))
            )
        );
    }

    #[test]
    fn overflowing_frame_stays_inside_buffer() {
        let payload = [1, 2, 3, 4, 5, 6];
        let mut frame = [0u8; 16];
        let len = encode_frame(MessageType::PwmTable, &payload, &mut frame).expect("encode");

        let mut parser = FrameParser::<4>::new();
        assert_eq!(feed_all(&mut parser, &frame[..len]), 1);

        let received = parser.frame().expect("frame");
        assert_eq!(received.payload, &[1, 2, 3, 4]);
        assert_eq!(parser.counters().overflow_bytes, 2);
    }

    #[test]
    fn counters_track_each_rejection_kind() {
        let mut parser = FrameParser::<8>::new();
        feed_all(&mut parser, &[0x00, 0x01]);
        feed_all(&mut parser, &[0xAA, 0x09]);
        feed_all(&mut parser, &[0xAA, 0x01, 0x01, 0x05, 0x00]);
        let good_checksum = 0xAA ^ 0x01 ^ 0x01 ^ 0x05;
        feed_all(&mut parser, &[0xAA, 0x01, 0x01, 0x05, good_checksum, 0x00]);

        let counters = parser.counters();
        assert_eq!(counters.noise_bytes, 2);
        assert_eq!(counters.bad_type, 1);
        assert_eq!(counters.checksum_mismatch, 1);
        assert_eq!(counters.missing_end, 1);
        assert_eq!(counters.framing_errors(), 3);
        assert_eq!(counters.frames_accepted, 0);
    }

    #[test]
    fn encode_rejects_oversized_payloads() {
        let payload = [0u8; MAX_PAYLOAD_LEN + 1];
        let mut out = [0u8; 300];
        assert_eq!(
            encode_frame(MessageType::PwmTable, &payload, &mut out),
            Err(EncodeError::PayloadTooLong { len: 256 })
        );
        assert_eq!(
            encode_frame(MessageType::PwmTable, &[1, 2, 3], &mut out[..7]),
            Err(EncodeError::BufferTooSmall { needed: 8 })
        );
    }
}
