use core::panic::PanicInfo;

use defmt::error;
use embassy_rp::pac;
use plasma_core::encoding::STATE_WORDS;

use crate::board;
use crate::waveform::WAVEFORM;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    // Stop the period feed and park the bridge open before reporting.
    cortex_m::interrupt::disable();
    let _ = WAVEFORM.take();
    pac::PIO0
        .txf(board::STATE_MACHINE)
        .write_value(STATE_WORDS.off_word());
    error!("PANIC: {}", defmt::Display2Format(info));
    cortex_m::asm::udf();
}
