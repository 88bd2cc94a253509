//! PWM-paced PIO output stage and the period interrupt.
//!
//! PWM slice 0 runs with no output pin purely as a 20 µs timebase; its wrap
//! interrupt feeds one packed word per period into PIO0's TX FIFO. The PIO
//! program shifts each word out as entry pattern, delay, exit pattern on
//! GPIO10..13.

#![cfg(target_os = "none")]

use embassy_rp::gpio::Level;
use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_rp::pac;
use embassy_rp::peripherals::PIO0;
use embassy_rp::pio::program::pio_asm;
use embassy_rp::pio::{
    Common, Config as PioConfig, Direction, FifoJoin, Pin, ShiftConfig, ShiftDirection,
    StateMachine,
};
use embassy_rp::pwm::{Config as PwmConfig, Pwm};
use fixed::traits::ToFixed;
use plasma_core::encoding::StateWords;
use plasma_core::shot::OutputStage;
use plasma_core::topology::SwitchSet;
use plasma_core::waveform::{CLOCK_DIVIDER, PWM_WRAP, TxFifo, WaveformContext};

use crate::board;

/// Everything the period interrupt shares with the shot task.
pub static WAVEFORM: WaveformContext = WaveformContext::new();

/// System clocks to wait after the FIFO drains so the last word reaches the pins.
const DRAIN_CYCLES: u32 = CLOCK_DIVIDER as u32 * 16;

struct Pio0TxFifo;

impl TxFifo for Pio0TxFifo {
    #[inline(always)]
    fn write_word(&mut self, word: u32) {
        pac::PIO0.txf(board::STATE_MACHINE).write_value(word);
    }
}

#[interrupt]
fn PWM_IRQ_WRAP() {
    pac::PWM.intr().write(|w| w.set_ch(board::PWM_SLICE, true));
    WAVEFORM.on_period(&mut Pio0TxFifo);

    // Wrapped again before we finished: a period boundary was missed.
    if pac::PWM.intr().read().ch(board::PWM_SLICE) {
        WAVEFORM.stats().record_overrun();
    }
}

/// H-bridge switch outputs driven by PIO0 and paced by the PWM wrap.
pub struct BridgeOutput<'d> {
    sm: StateMachine<'d, PIO0, 0>,
    pwm: Pwm<'d>,
    pwm_config: PwmConfig,
}

impl<'d> BridgeOutput<'d> {
    /// Loads the switching program, claims the switch pins and configures the
    /// timebase. Both the state machine and the slice are left disabled.
    pub fn new(
        common: &mut Common<'d, PIO0>,
        mut sm: StateMachine<'d, PIO0, 0>,
        pins: [Pin<'d, PIO0>; 4],
        pwm: Pwm<'d>,
    ) -> Self {
        // Word layout, LSB first: entry[3:0] entry[7:4] delay[23:8] exit[27:24] exit[31:28].
        let program = pio_asm!(
            ".wrap_target",
            "pull block",
            "out pins, 4",
            "out pins, 4",
            "out x, 16",
            "delay:",
            "jmp x-- delay",
            "out pins, 4",
            "out pins, 4",
            ".wrap",
        );

        let pin_refs = [&pins[0], &pins[1], &pins[2], &pins[3]];
        let mut config = PioConfig::default();
        config.use_program(&common.load_program(&program.program), &[]);
        config.set_out_pins(&pin_refs);
        config.clock_divider = CLOCK_DIVIDER.to_fixed();
        config.fifo_join = FifoJoin::TxOnly;
        config.shift_out = ShiftConfig {
            auto_fill: false,
            threshold: 32,
            direction: ShiftDirection::Right,
        };

        sm.set_config(&config);
        sm.set_pins(Level::Low, &pin_refs);
        sm.set_pin_dirs(Direction::Out, &pin_refs);

        let mut pwm_config = PwmConfig::default();
        pwm_config.divider = CLOCK_DIVIDER.to_fixed();
        pwm_config.top = PWM_WRAP;
        pwm_config.enable = false;

        let mut output = Self {
            sm,
            pwm,
            pwm_config,
        };
        output.pwm.set_config(&output.pwm_config);

        interrupt::PWM_IRQ_WRAP.set_priority(Priority::P0);
        output
    }

    /// Drives `pattern` statically until the next shot or hold.
    pub fn hold(&mut self, pattern: SwitchSet) {
        self.prepare();
        self.force_word(StateWords::hold_word(pattern));
    }
}

impl OutputStage for BridgeOutput<'_> {
    fn prepare(&mut self) {
        self.sm.set_enable(true);
    }

    fn start(&mut self) {
        pac::PWM.intr().write(|w| w.set_ch(board::PWM_SLICE, true));
        pac::PWM.inte().modify(|w| w.set_ch(board::PWM_SLICE, true));
        interrupt::PWM_IRQ_WRAP.unpend();
        unsafe { interrupt::PWM_IRQ_WRAP.enable() };

        self.pwm_config.enable = true;
        self.pwm.set_config(&self.pwm_config);
    }

    fn stop(&mut self) {
        self.pwm_config.enable = false;
        self.pwm.set_config(&self.pwm_config);

        interrupt::PWM_IRQ_WRAP.disable();
        pac::PWM.inte().modify(|w| w.set_ch(board::PWM_SLICE, false));
        pac::PWM.intr().write(|w| w.set_ch(board::PWM_SLICE, true));
    }

    fn force_word(&mut self, word: u32) {
        while !self.sm.tx().try_push(word) {}
    }

    fn release(&mut self) {
        while !self.sm.tx().empty() {}
        cortex_m::asm::delay(DRAIN_CYCLES);
        self.sm.set_enable(false);
    }
}
