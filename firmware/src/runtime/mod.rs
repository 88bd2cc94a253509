use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_rp::peripherals::{PIO0, USB};
use embassy_rp::pio::Pio;
use embassy_rp::pwm::{Config as PwmConfig, Pwm};
use embassy_rp::usb::Driver;
use embassy_sync::channel::Channel;
use plasma_core::protocol::FrameParser;
use plasma_core::topology::SwitchLine;
use static_cell::{ConstStaticCell, StaticCell};

use crate::board;
use crate::command::CommandQueue;
use crate::usb::{UsbDeviceStorage, UsbDeviceStrings, UsbSerial};
use crate::waveform::BridgeOutput;

mod led_task;
mod link_task;
mod shot_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

embassy_rp::bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => embassy_rp::usb::InterruptHandler<USB>;
    PIO0_IRQ_0 => embassy_rp::pio::InterruptHandler<PIO0>;
});

static COMMAND_QUEUE: CommandQueue = Channel::new();
static PARSER: ConstStaticCell<FrameParser> = ConstStaticCell::new(FrameParser::new());
static USB_STORAGE: StaticCell<UsbDeviceStorage> = StaticCell::new();

/// Converts a core duration into the executor's tick-based duration.
fn embassy_duration(duration: core::time::Duration) -> embassy_time::Duration {
    embassy_time::Duration::from_micros(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let p = embassy_rp::init(embassy_rp::config::Config::default());

    let Pio {
        mut common, sm0, ..
    } = Pio::new(p.PIO0, Irqs);
    let switch_pins = [
        common.make_pio_pin(p.PIN_10),
        common.make_pio_pin(p.PIN_11),
        common.make_pio_pin(p.PIN_12),
        common.make_pio_pin(p.PIN_13),
    ];
    let timebase = Pwm::new_free(p.PWM_SLICE0, PwmConfig::default());
    let output = BridgeOutput::new(&mut common, sm0, switch_pins, timebase);
    defmt::info!(
        "waveform: bridge on GPIO{}..=GPIO{}, timebase slice {}",
        board::switch_pin(SwitchLine::S1),
        board::switch_pin(SwitchLine::S4),
        board::PWM_SLICE
    );

    let led = Output::new(p.PIN_25, Level::Low);
    defmt::info!("status: LED on GPIO{}", board::LED_PIN);

    let driver = Driver::new(p.USB, Irqs);
    embassy_rp::interrupt::USBCTRL_IRQ.set_priority(Priority::P1);
    embassy_rp::interrupt::PIO0_IRQ_0.set_priority(Priority::P1);
    let mut serial = UsbSerial::new(
        driver,
        USB_STORAGE.init(UsbDeviceStorage::new()),
        UsbDeviceStrings::default(),
    );
    let link = serial.take_link().expect("CDC link unavailable");

    spawner
        .spawn(usb_task::run(serial.device))
        .expect("failed to spawn USB task");
    spawner
        .spawn(link_task::run(link, PARSER.take(), &COMMAND_QUEUE))
        .expect("failed to spawn link task");
    spawner
        .spawn(shot_task::run(output, &COMMAND_QUEUE))
        .expect("failed to spawn shot task");
    spawner
        .spawn(led_task::run(led))
        .expect("failed to spawn LED task");

    core::future::pending::<()>().await;
}
