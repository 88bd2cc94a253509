//! Pin assignments and fixed hardware parameters for the Pico carrier.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::time::Duration;

use plasma_core::topology::SwitchLine;

/// GPIO driving S1; S2..S4 follow on consecutive pins as PIO out pins.
pub const SWITCH_BASE_PIN: u8 = 10;
/// On-board status LED.
pub const LED_PIN: u8 = 25;
/// PWM slice whose wrap paces the waveform interrupt. No output pin is used.
pub const PWM_SLICE: usize = 0;
/// PIO0 state machine running the switching program.
pub const STATE_MACHINE: usize = 0;
/// Refresh interval of the status LED task.
pub const LED_REFRESH: Duration = Duration::from_millis(10);

/// GPIO number for a bridge switch line.
#[must_use]
pub const fn switch_pin(line: SwitchLine) -> u8 {
    SWITCH_BASE_PIN + line.pin_offset()
}

/// USB identity advertised to the host.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x0001;
