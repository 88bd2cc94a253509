//! Period-boundary waveform generation.
//!
//! A PWM slice wraps every 20 µs and raises an interrupt. The handler hands
//! the PIO the word computed during the previous period, then computes the
//! word for the next one from the current target. That one-period look-ahead
//! keeps the FIFO write at the very top of the handler, well inside the
//! deadline.
//!
//! Foreground code only ever touches [`WaveformContext::set_target`]; the
//! generator itself is installed before the interrupt is enabled and taken
//! back after it is disabled.

use core::cell::RefCell;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

use crate::encoding::StateWords;

/// System clock the timing below is derived from.
pub const SYS_CLOCK_HZ: u32 = 125_000_000;
/// Integer divider shared by the PWM slice and the PIO state machine.
pub const CLOCK_DIVIDER: u8 = 5;
/// Counted clock after the divider (one PIO delay count = 40 ns).
pub const COUNTED_CLOCK_HZ: u32 = SYS_CLOCK_HZ / CLOCK_DIVIDER as u32;
/// PWM counter top; the slice wraps after `PWM_WRAP + 1` counts.
pub const PWM_WRAP: u16 = 499;
/// Length of one output period.
pub const PERIOD_NANOS: u32 = (PWM_WRAP as u32 + 1) * (1_000_000_000 / COUNTED_CLOCK_HZ);
/// Duration of one delay count.
pub const DELAY_UNIT_NANOS: u32 = 1_000_000_000 / COUNTED_CLOCK_HZ;

/// Shortest switchable on-time (≈1 µs plus switching); below this is the dead zone.
pub const MIN_DELAY: u16 = 25;
/// Longest on-time (≈18 µs), ~92.5 % of the period.
pub const MAX_DELAY: u16 = 450;
/// Delay counts per target step.
pub const DELAY_STEP: u16 = 5;
/// Targets below this value drive negative pulses.
pub const POLARITY_SPLIT: u16 = 100;
/// Largest target the protocol defines.
pub const TARGET_MAX: u16 = 199;
/// Hold time of the free-wheel word armed before the first period.
pub const ARM_DELAY: u16 = 250;

const _: () = assert!(PERIOD_NANOS == 20_000);
const _: () = assert!(DELAY_UNIT_NANOS == 40);

/// Direction of coil current for a drive period.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Polarity {
    Negative,
    Positive,
}

/// What the bridge does during one period.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DutyCommand {
    /// Dead zone: the raw delay was too short to switch reliably.
    FreeWheel { raw_delay: u32 },
    /// Conduct for `delay` counts, already clamped to the ceiling.
    Drive { polarity: Polarity, delay: u16 },
}

impl DutyCommand {
    /// Maps a target onto polarity and on-time.
    #[must_use]
    // `raw` is range-checked against MAX_DELAY before narrowing.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn for_target(target: u16) -> Self {
        let (polarity, raw) = raw_delay(target);
        if raw < MIN_DELAY as u32 {
            DutyCommand::FreeWheel { raw_delay: raw }
        } else if raw > MAX_DELAY as u32 {
            DutyCommand::Drive {
                polarity,
                delay: MAX_DELAY,
            }
        } else {
            DutyCommand::Drive {
                polarity,
                delay: raw as u16,
            }
        }
    }
}

/// Polarity and unclamped delay for a target.
#[must_use]
pub const fn raw_delay(target: u16) -> (Polarity, u32) {
    let step = DELAY_STEP as u32;
    if target < POLARITY_SPLIT {
        (Polarity::Negative, (POLARITY_SPLIT - target) as u32 * step)
    } else {
        (Polarity::Positive, (target as u32 - (POLARITY_SPLIT as u32 - 1)) * step)
    }
}

/// Computes the packed word for the next period.
///
/// Dead-zone targets select the free-wheel cycle but still carry their raw
/// delay in the delay lane, matching the word the PIO has always received.
#[inline(always)]
#[must_use]
pub fn next_state_for(words: &StateWords, target: u16) -> u32 {
    match DutyCommand::for_target(target) {
        DutyCommand::FreeWheel { raw_delay } => words.free_cycle | (raw_delay << 8),
        DutyCommand::Drive {
            polarity: Polarity::Negative,
            delay,
        } => words.negative_cycle | (u32::from(delay) << 8),
        DutyCommand::Drive {
            polarity: Polarity::Positive,
            delay,
        } => words.positive_cycle | (u32::from(delay) << 8),
    }
}

/// Sink for packed words; the firmware writes the PIO TX FIFO register.
pub trait TxFifo {
    /// Queues `word` without waiting or checking for space.
    fn write_word(&mut self, word: u32);
}

/// Target value shared between the shot sequencer and the interrupt.
pub struct TargetCell(AtomicU16);

impl TargetCell {
    #[must_use]
    pub const fn new(initial: u16) -> Self {
        Self(AtomicU16::new(initial))
    }

    /// Publishes a new target with a single store.
    pub fn publish(&self, target: u16) {
        self.0.store(target, Ordering::Release);
    }

    #[must_use]
    pub fn load(&self) -> u16 {
        self.0.load(Ordering::Acquire)
    }
}

/// Diagnostics written by the interrupt and read by the foreground.
pub struct WaveformStats {
    cycles: AtomicU32,
    overruns: AtomicU32,
    in_period: AtomicBool,
}

impl WaveformStats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cycles: AtomicU32::new(0),
            overruns: AtomicU32::new(0),
            in_period: AtomicBool::new(false),
        }
    }

    /// Marks the start of a period. Returns `false` (and counts an overrun)
    /// when the previous invocation never finished.
    pub fn begin_period(&self) -> bool {
        if self.in_period.load(Ordering::Acquire) {
            self.record_overrun();
            return false;
        }
        self.in_period.store(true, Ordering::Release);
        true
    }

    pub fn end_period(&self) {
        self.in_period.store(false, Ordering::Release);
    }

    /// Counts a missed period boundary.
    pub fn record_overrun(&self) {
        // Single writer: only the interrupt updates the counters.
        let count = self.overruns.load(Ordering::Relaxed);
        self.overruns.store(count.wrapping_add(1), Ordering::Relaxed);
    }

    fn count_cycle(&self) {
        let count = self.cycles.load(Ordering::Relaxed);
        self.cycles.store(count.wrapping_add(1), Ordering::Relaxed);
    }

    #[must_use]
    pub fn cycles(&self) -> u32 {
        self.cycles.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn overrun_detected(&self) -> bool {
        self.overruns() != 0
    }

    /// Clears the counters; call only while the interrupt is disabled.
    pub fn reset(&self) {
        self.cycles.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.in_period.store(false, Ordering::Relaxed);
    }
}

impl Default for WaveformStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-owned pipeline state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WaveformGenerator {
    words: StateWords,
    next_state: u32,
}

impl WaveformGenerator {
    /// Creates a generator whose first emitted word is `initial`.
    #[must_use]
    pub const fn armed(words: StateWords, initial: u32) -> Self {
        Self {
            words,
            next_state: initial,
        }
    }

    /// Word that will be emitted at the next period boundary.
    #[must_use]
    pub const fn pending_word(&self) -> u32 {
        self.next_state
    }

    #[must_use]
    pub const fn words(&self) -> &StateWords {
        &self.words
    }

    /// Emits the queued word, then computes the one for the following period.
    #[inline(always)]
    pub fn on_period<F: TxFifo>(&mut self, target: u16, fifo: &mut F) {
        fifo.write_word(self.next_state);
        self.next_state = next_state_for(&self.words, target);
    }
}

/// Everything the period interrupt shares with the foreground.
pub struct WaveformContext {
    target: TargetCell,
    stats: WaveformStats,
    generator: Mutex<RefCell<Option<WaveformGenerator>>>,
}

impl WaveformContext {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            target: TargetCell::new(POLARITY_SPLIT),
            stats: WaveformStats::new(),
            generator: Mutex::new(RefCell::new(None)),
        }
    }

    /// Publishes the target the next period computation will read.
    pub fn set_target(&self, target: u16) {
        self.target.publish(target);
    }

    #[must_use]
    pub fn target(&self) -> u16 {
        self.target.load()
    }

    #[must_use]
    pub fn stats(&self) -> &WaveformStats {
        &self.stats
    }

    /// Installs a freshly armed generator. The period interrupt must be off.
    pub fn install(&self, generator: WaveformGenerator) {
        self.stats.reset();
        critical_section::with(|cs| {
            self.generator.borrow(cs).replace(Some(generator));
        });
    }

    /// Removes the generator so the slot is empty until the next shot.
    pub fn take(&self) -> Option<WaveformGenerator> {
        critical_section::with(|cs| self.generator.borrow(cs).take())
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        critical_section::with(|cs| self.generator.borrow(cs).borrow().is_some())
    }

    /// Interrupt body, run after the wrap flag has been cleared.
    ///
    /// Returns `false` when nothing was emitted (no generator installed or the
    /// previous invocation was still running).
    pub fn on_period<F: TxFifo>(&self, fifo: &mut F) -> bool {
        if !self.stats.begin_period() {
            return false;
        }

        let target = self.target.load();
        let emitted = critical_section::with(|cs| {
            match self.generator.borrow(cs).borrow_mut().as_mut() {
                Some(generator) => {
                    generator.on_period(target, fifo);
                    true
                }
                None => false,
            }
        });

        if emitted {
            self.stats.count_cycle();
        }
        self.stats.end_period();
        emitted
    }
}

impl Default for WaveformContext {
    fn default() -> Self {
        Self::new()
    }
}
