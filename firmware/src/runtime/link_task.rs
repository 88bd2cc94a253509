use embassy_futures::select::{Either, select};
use embassy_rp::peripherals::USB;
use embassy_rp::usb::Driver;
use embassy_usb::driver::EndpointError;
use plasma_core::protocol::{FrameEvent, FrameParser};
use plasma_core::status::SystemState;

use crate::command::{CommandQueue, CommandSender, DriverCommand};
use crate::status::{self, CANCEL, SYSTEM_STATE};
use crate::telemetry::{FirmwareInstant, FirmwareTelemetry};
use crate::usb::{self, CdcLink};

#[embassy_executor::task]
pub async fn run(
    mut link: CdcLink<Driver<'static, USB>>,
    parser: &'static mut FrameParser,
    queue: &'static CommandQueue,
) -> ! {
    let sender = queue.sender();
    let mut telemetry = FirmwareTelemetry::new();
    let mut packet = [0u8; usb::MAX_PACKET_SIZE as usize];

    loop {
        link.wait_attached().await;
        parser.reset();
        let previous = SYSTEM_STATE.get();
        status::set_link_attached(true);
        telemetry.link(true, previous, FirmwareInstant::now());
        defmt::info!("link: host attached");

        loop {
            match select(
                link.receiver.read_packet(&mut packet),
                link.control.control_changed(),
            )
            .await
            {
                Either::First(Ok(count)) => {
                    for &byte in &packet[..count] {
                        handle_byte(parser, byte, &sender, &mut telemetry);
                    }
                }
                Either::First(Err(EndpointError::Disabled)) => {
                    defmt::warn!("link: interface disabled");
                    break;
                }
                Either::First(Err(EndpointError::BufferOverflow)) => {
                    defmt::warn!("link: packet overflow");
                }
                Either::Second(()) => {
                    if !link.dtr() {
                        defmt::warn!("link: host dropped DTR");
                        break;
                    }
                }
            }
        }

        if status::firing() {
            defmt::warn!("link: cancelling shot in flight");
            CANCEL.cancel();
        }
        let previous = SYSTEM_STATE.get();
        status::set_link_attached(false);
        telemetry.link(false, previous, FirmwareInstant::now());
    }
}

fn handle_byte(
    parser: &mut FrameParser,
    byte: u8,
    sender: &CommandSender,
    telemetry: &mut FirmwareTelemetry,
) {
    let event = parser.push(byte);
    if let Some(state) = event.system_state() {
        status::publish_link_state(state);
    }

    match event {
        FrameEvent::Completed { kind, length } => {
            telemetry.frame_accepted(kind, length, parser.received_count(), FirmwareInstant::now());
            let Some(frame) = parser.frame() else {
                return;
            };

            match DriverCommand::from_frame(&frame) {
                Ok(command) => dispatch(command, sender),
                Err(error) => {
                    defmt::warn!(
                        "link: {} payload refused: {}",
                        defmt::Display2Format(&kind),
                        defmt::Display2Format(&error)
                    );
                    telemetry.payload_rejected(kind, FirmwareInstant::now());
                    status::publish_link_state(SystemState::Idle);
                }
            }
        }
        FrameEvent::Rejected(error) => {
            telemetry.frame_rejected(error, FirmwareInstant::now());
        }
        FrameEvent::None
        | FrameEvent::Started
        | FrameEvent::Store { .. }
        | FrameEvent::Dropped { .. } => {}
    }
}

fn dispatch(command: DriverCommand, sender: &CommandSender) {
    if status::firing() && !command.allowed_while_firing() {
        defmt::warn!("link: manual frame refused while firing");
        return;
    }

    let fire = matches!(command, DriverCommand::Fire(_));
    if sender.try_send(command).is_err() {
        defmt::warn!("link: shot queue full, frame dropped");
        status::publish_link_state(SystemState::Idle);
        return;
    }

    // Only a queued table keeps the data-ready indication.
    if !fire {
        status::publish_link_state(SystemState::Idle);
    }
}
