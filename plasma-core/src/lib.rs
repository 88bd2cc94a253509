#![no_std]

// Shared logic for the plasma pulse driver.
//
// Everything that carries a timing, encoding, or framing invariant lives here
// so the RP2040 firmware and the host emulator run the exact same code paths.

pub mod encoding;
pub mod protocol;
pub mod shot;
pub mod status;
pub mod telemetry;
pub mod topology;
pub mod waveform;
