//! Work handed from the link task to the shot task.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Sender};
use plasma_core::protocol::{
    ConfigCommand, Frame, ManualCommand, MAX_PAYLOAD_LEN, Message, MessageError,
};

/// Commands buffered while a shot is running.
pub const COMMAND_QUEUE_DEPTH: usize = 2;

/// Copy of a received target table, detached from the parser buffer.
pub type ShotTable = heapless::Vec<u8, MAX_PAYLOAD_LEN>;

pub type CommandQueue = Channel<CriticalSectionRawMutex, DriverCommand, COMMAND_QUEUE_DEPTH>;
pub type CommandSender =
    Sender<'static, CriticalSectionRawMutex, DriverCommand, COMMAND_QUEUE_DEPTH>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DriverCommand {
    /// Run one shot over the table.
    Fire(ShotTable),
    /// Park the bridge on a static pattern.
    Hold(ManualCommand),
    Configure(ConfigCommand),
}

impl DriverCommand {
    /// Decodes a completed frame into the command the shot task runs.
    pub fn from_frame(frame: &Frame<'_>) -> Result<Self, MessageError> {
        match frame.message()? {
            Message::PwmTable(table) => ShotTable::from_slice(table)
                .map(DriverCommand::Fire)
                .map_err(|_| MessageError::Malformed {
                    kind: frame.kind,
                    len: table.len(),
                }),
            Message::Manual(manual) => Ok(DriverCommand::Hold(manual)),
            Message::Config(config) => Ok(DriverCommand::Configure(config)),
        }
    }

    /// Whether the command may be queued while a shot is running.
    #[must_use]
    pub const fn allowed_while_firing(&self) -> bool {
        !matches!(self, DriverCommand::Hold(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plasma_core::protocol::{ConfigParam, FrameParser, MessageType, encode_frame};
    use plasma_core::topology::SwitchSet;

    fn parse(kind: MessageType, payload: &[u8]) -> Result<DriverCommand, MessageError> {
        let mut wire = [0u8; MAX_PAYLOAD_LEN + 5];
        let len = encode_frame(kind, payload, &mut wire).unwrap();
        let mut parser = FrameParser::<512>::new();
        let mut command = None;
        for &byte in &wire[..len] {
            if let Some(frame) = parser.feed(byte) {
                command = Some(DriverCommand::from_frame(&frame));
            }
        }
        command.expect("frame completes")
    }

    #[test]
    fn table_frame_is_copied_out_of_the_parser() {
        let command = parse(MessageType::PwmTable, &[5, 10, 199]).unwrap();
        match command {
            DriverCommand::Fire(table) => assert_eq!(table.as_slice(), [5, 10, 199]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn largest_table_fits_the_copy() {
        let payload = [100u8; MAX_PAYLOAD_LEN];
        match parse(MessageType::PwmTable, &payload).unwrap() {
            DriverCommand::Fire(table) => assert_eq!(table.len(), MAX_PAYLOAD_LEN),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn manual_and_config_frames_map_to_commands() {
        assert_eq!(
            parse(MessageType::Manual, &[0, 1, 0, 1]),
            Ok(DriverCommand::Hold(ManualCommand {
                pattern: SwitchSet::FREE_WHEEL
            }))
        );
        assert_eq!(
            parse(MessageType::Config, &[0x01, 0x2C, 0x01]),
            Ok(DriverCommand::Configure(ConfigCommand {
                param: ConfigParam::ArmDelay,
                value: 300
            }))
        );
    }

    #[test]
    fn invalid_payloads_surface_message_errors() {
        assert_eq!(
            parse(MessageType::Manual, &[0, 0, 1, 1]),
            Err(MessageError::ShootThrough(SwitchSet::from_bits(0xC)))
        );
    }

    #[test]
    fn only_holds_are_refused_while_firing() {
        let hold = DriverCommand::Hold(ManualCommand {
            pattern: SwitchSet::OFF,
        });
        assert!(!hold.allowed_while_firing());
        assert!(DriverCommand::Fire(ShotTable::new()).allowed_while_firing());
    }
}
