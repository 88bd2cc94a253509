//! Typed payloads for each frame type.

use core::fmt;
use core::ops::RangeInclusive;

use winnow::binary;
use winnow::prelude::*;

use super::MessageType;
use crate::topology::{SwitchLine, SwitchSet};
use crate::waveform::{MAX_DELAY, MIN_DELAY};

/// Runtime parameters a config frame may set.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigParam {
    /// Hold time of the free-wheel word armed before a shot, in delay counts.
    ArmDelay,
    /// Shot tick period in microseconds.
    TickPeriodMicros,
}

impl ConfigParam {
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(ConfigParam::ArmDelay),
            0x02 => Some(ConfigParam::TickPeriodMicros),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            ConfigParam::ArmDelay => 0x01,
            ConfigParam::TickPeriodMicros => 0x02,
        }
    }

    /// Values the parameter accepts.
    #[must_use]
    pub const fn valid_range(self) -> RangeInclusive<u16> {
        match self {
            ConfigParam::ArmDelay => MIN_DELAY..=MAX_DELAY,
            ConfigParam::TickPeriodMicros => 100..=10_000,
        }
    }
}

impl fmt::Display for ConfigParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConfigParam::ArmDelay => "arm-delay",
            ConfigParam::TickPeriodMicros => "tick-period-us",
        };
        f.write_str(label)
    }
}

/// Static switch pattern requested by a manual frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ManualCommand {
    pub pattern: SwitchSet,
}

/// Parameter update requested by a config frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConfigCommand {
    pub param: ConfigParam,
    pub value: u16,
}

/// Decoded frame payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Message<'a> {
    /// One target per shot tick.
    PwmTable(&'a [u8]),
    Manual(ManualCommand),
    Config(ConfigCommand),
}

/// Payload rejected after a frame passed framing checks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageError {
    /// Target table with no entries.
    EmptyTable,
    /// Payload shape does not match the frame type.
    Malformed { kind: MessageType, len: usize },
    /// Manual pattern closes both switches of a bridge leg.
    ShootThrough(SwitchSet),
    UnknownParam(u8),
    OutOfRange { param: ConfigParam, value: u16 },
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::EmptyTable => f.write_str("empty target table"),
            MessageError::Malformed { kind, len } => {
                write!(f, "malformed {kind} payload ({len} bytes)")
            }
            MessageError::ShootThrough(pattern) => {
                write!(f, "pattern {pattern} shorts a bridge leg")
            }
            MessageError::UnknownParam(id) => write!(f, "unknown config parameter 0x{id:02x}"),
            MessageError::OutOfRange { param, value } => {
                let range = param.valid_range();
                write!(
                    f,
                    "{param}={value} outside {}..={}",
                    range.start(),
                    range.end()
                )
            }
        }
    }
}

impl<'a> Message<'a> {
    /// Decodes `payload` according to `kind`.
    pub fn decode(kind: MessageType, payload: &'a [u8]) -> Result<Self, MessageError> {
        let malformed = |_| MessageError::Malformed {
            kind,
            len: payload.len(),
        };

        match kind {
            MessageType::PwmTable => {
                if payload.is_empty() {
                    Err(MessageError::EmptyTable)
                } else {
                    Ok(Message::PwmTable(payload))
                }
            }
            MessageType::Manual => {
                let pattern = manual_pattern.parse(payload).map_err(malformed)?;
                if pattern.shoots_through() {
                    return Err(MessageError::ShootThrough(pattern));
                }
                Ok(Message::Manual(ManualCommand { pattern }))
            }
            MessageType::Config => {
                let (id, value) = config_fields.parse(payload).map_err(malformed)?;
                let param = ConfigParam::from_byte(id).ok_or(MessageError::UnknownParam(id))?;
                if !param.valid_range().contains(&value) {
                    return Err(MessageError::OutOfRange { param, value });
                }
                Ok(Message::Config(ConfigCommand { param, value }))
            }
        }
    }
}

/// One byte per switch, 0 = open, 1 = closed.
fn switch_state(input: &mut &[u8]) -> winnow::Result<bool> {
    binary::u8
        .verify_map(|raw| match raw {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        })
        .parse_next(input)
}

/// `[S1, S2, S3, S4]`.
fn manual_pattern(input: &mut &[u8]) -> winnow::Result<SwitchSet> {
    (switch_state, switch_state, switch_state, switch_state)
        .map(|(s1, s2, s3, s4)| {
            SwitchSet::OFF
                .with(SwitchLine::S1, s1)
                .with(SwitchLine::S2, s2)
                .with(SwitchLine::S3, s3)
                .with(SwitchLine::S4, s4)
        })
        .parse_next(input)
}

/// `[param_id, value_lo, value_hi]`.
fn config_fields(input: &mut &[u8]) -> winnow::Result<(u8, u16)> {
    (binary::u8, binary::le_u16).parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_payload_is_borrowed_verbatim() {
        let payload = [0x05, 0x0A, 0xC7];
        assert_eq!(
            Message::decode(MessageType::PwmTable, &payload),
            Ok(Message::PwmTable(&payload[..]))
        );
        assert_eq!(
            Message::decode(MessageType::PwmTable, &[]),
            Err(MessageError::EmptyTable)
        );
    }

    #[test]
    fn manual_payload_maps_to_switch_set() {
        assert_eq!(
            Message::decode(MessageType::Manual, &[0, 1, 0, 1]),
            Ok(Message::Manual(ManualCommand {
                pattern: SwitchSet::FREE_WHEEL
            }))
        );
        assert_eq!(
            Message::decode(MessageType::Manual, &[0, 0, 0, 0]),
            Ok(Message::Manual(ManualCommand {
                pattern: SwitchSet::OFF
            }))
        );
    }

    #[test]
    fn manual_payload_refuses_shoot_through() {
        assert_eq!(
            Message::decode(MessageType::Manual, &[1, 1, 0, 0]),
            Err(MessageError::ShootThrough(SwitchSet::from_bits(0x3)))
        );
    }

    #[test]
    fn manual_payload_shape_is_strict() {
        for payload in [&[0u8, 1, 0][..], &[0, 1, 0, 1, 0], &[0, 2, 0, 1]] {
            assert_eq!(
                Message::decode(MessageType::Manual, payload),
                Err(MessageError::Malformed {
                    kind: MessageType::Manual,
                    len: payload.len()
                })
            );
        }
    }

    #[test]
    fn config_value_is_little_endian() {
        assert_eq!(
            Message::decode(MessageType::Config, &[0x02, 0xE8, 0x03]),
            Ok(Message::Config(ConfigCommand {
                param: ConfigParam::TickPeriodMicros,
                value: 1_000
            }))
        );
    }

    #[test]
    fn config_rejects_unknown_and_out_of_range() {
        assert_eq!(
            Message::decode(MessageType::Config, &[0x7F, 0x00, 0x00]),
            Err(MessageError::UnknownParam(0x7F))
        );
        assert_eq!(
            Message::decode(MessageType::Config, &[0x01, 0x10, 0x00]),
            Err(MessageError::OutOfRange {
                param: ConfigParam::ArmDelay,
                value: 16
            })
        );
        assert_eq!(
            Message::decode(MessageType::Config, &[0x01, 0x00]),
            Err(MessageError::Malformed {
                kind: MessageType::Config,
                len: 2
            })
        );
    }
}
