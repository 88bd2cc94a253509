use embassy_rp::gpio::Output;
use embassy_time::{Instant, Ticker};
use plasma_core::status::StatusIndicator;

use super::embassy_duration;
use crate::board;
use crate::status::SYSTEM_STATE;

#[embassy_executor::task]
pub async fn run(mut led: Output<'static>) -> ! {
    let mut indicator = StatusIndicator::new();
    let mut ticker = Ticker::every(embassy_duration(board::LED_REFRESH));

    loop {
        let since_boot = core::time::Duration::from_micros(Instant::now().as_micros());
        if indicator.tick(SYSTEM_STATE.get(), since_boot) {
            led.set_high();
        } else {
            led.set_low();
        }
        ticker.next().await;
    }
}
