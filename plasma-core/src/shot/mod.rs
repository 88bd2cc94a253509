//! Shot sequencing.
//!
//! A shot walks a target table at a fixed tick cadence (1 ms by default),
//! publishing one target per tick for the period interrupt to pick up. The
//! sequencer owns the output lifecycle around the shot: it arms the
//! generator, starts the PWM slice, and on completion or cancellation stops
//! the slice, parks the bridge on the off pattern, and releases the PIO.
//!
//! The sequencer is clock-agnostic: the caller waits one tick period between
//! calls to [`ShotSequencer::tick`].

use core::fmt;
use core::time::Duration;

use portable_atomic::{AtomicBool, Ordering};

use crate::encoding::STATE_WORDS;
use crate::protocol::{ConfigCommand, ConfigParam};
use crate::waveform::{ARM_DELAY, POLARITY_SPLIT, WaveformContext, WaveformGenerator};

/// Ticks in the reference shot (200 ms at 1 ms per tick).
pub const BASELINE_PULSE_COUNT: u16 = 199;

/// Hardware the sequencer switches on and off around a shot.
pub trait OutputStage {
    /// Enables the PIO state machine so it can accept words.
    fn prepare(&mut self);
    /// Starts the PWM slice and unmasks its wrap interrupt.
    fn start(&mut self);
    /// Masks the wrap interrupt and stops the slice.
    fn stop(&mut self);
    /// Blocking push of `word` straight to the PIO.
    fn force_word(&mut self, word: u32);
    /// Disables the state machine once the last word has drained.
    fn release(&mut self);
}

/// Where a shot's targets come from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShotTargets<'a> {
    /// Targets received over the serial link, one per tick.
    Table(&'a [u8]),
    /// Diagnostic ramp `0..=pulse_count`, the tick index used as target.
    Ramp { pulse_count: u16 },
}

impl ShotTargets<'_> {
    /// Number of targets the shot publishes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ShotTargets::Table(table) => table.len(),
            ShotTargets::Ramp { pulse_count } => usize::from(*pulse_count) + 1,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Target for `tick`, if the shot is that long.
    #[must_use]
    pub fn target_at(&self, tick: usize) -> Option<u16> {
        match self {
            ShotTargets::Table(table) => table.get(tick).copied().map(u16::from),
            ShotTargets::Ramp { pulse_count } => u16::try_from(tick)
                .ok()
                .filter(|index| index <= pulse_count),
        }
    }
}

/// Runtime-adjustable shot parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ShotConfig {
    /// Hold time of the free-wheel word armed before the first period.
    pub arm_delay: u16,
    /// Spacing between published targets.
    pub tick_period: Duration,
}

impl ShotConfig {
    /// Applies a validated config frame.
    pub fn apply(&mut self, command: ConfigCommand) {
        match command.param {
            ConfigParam::ArmDelay => self.arm_delay = command.value,
            ConfigParam::TickPeriodMicros => {
                self.tick_period = Duration::from_micros(u64::from(command.value));
            }
        }
    }
}

impl Default for ShotConfig {
    fn default() -> Self {
        Self {
            arm_delay: ARM_DELAY,
            tick_period: Duration::from_millis(1),
        }
    }
}

/// Request to stop a running shot at the next tick.
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns and clears the pending request.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Reasons a shot refuses to start.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShotError {
    /// No targets to publish.
    EmptyTargets,
    /// A generator is still installed from an earlier shot.
    AlreadyArmed,
}

impl fmt::Display for ShotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShotError::EmptyTargets => f.write_str("shot has no targets"),
            ShotError::AlreadyArmed => f.write_str("waveform generator already armed"),
        }
    }
}

/// How a shot ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShotOutcome {
    Completed,
    Cancelled,
}

impl fmt::Display for ShotOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShotOutcome::Completed => f.write_str("completed"),
            ShotOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Summary produced when a shot ends.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ShotReport {
    pub outcome: ShotOutcome,
    /// Targets published before the shot ended.
    pub ticks: usize,
    /// PWM periods serviced by the interrupt.
    pub cycles: u32,
    pub overruns: u32,
}

/// Result of one tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShotProgress {
    /// `target` was published for tick `tick`.
    Running { tick: usize, target: u16 },
    Finished(ShotReport),
}

/// Drives one shot from arm to release.
pub struct ShotSequencer<'a, S: OutputStage> {
    stage: &'a mut S,
    context: &'a WaveformContext,
    targets: ShotTargets<'a>,
    next_tick: usize,
    running: bool,
}

impl<'a, S: OutputStage> ShotSequencer<'a, S> {
    /// Arms the generator and starts the output.
    ///
    /// The interrupt free-wheels until the first tick publishes a target.
    pub fn start(
        stage: &'a mut S,
        context: &'a WaveformContext,
        targets: ShotTargets<'a>,
        config: &ShotConfig,
    ) -> Result<Self, ShotError> {
        if targets.is_empty() {
            return Err(ShotError::EmptyTargets);
        }
        if context.is_armed() {
            return Err(ShotError::AlreadyArmed);
        }

        context.set_target(POLARITY_SPLIT);
        stage.prepare();
        context.install(WaveformGenerator::armed(
            STATE_WORDS,
            STATE_WORDS.arm_word(config.arm_delay),
        ));
        stage.start();

        Ok(Self {
            stage,
            context,
            targets,
            next_tick: 0,
            running: true,
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ticks the shot takes, including the final one that shuts it down.
    #[must_use]
    pub fn total_ticks(&self) -> usize {
        self.targets.len() + 1
    }

    /// Advances by one tick. `cancelled` ends the shot immediately.
    ///
    /// Every target stays live for a full tick; the call after the last
    /// target is published performs the shutdown.
    pub fn tick(&mut self, cancelled: bool) -> ShotProgress {
        if !self.running {
            return ShotProgress::Finished(self.report(ShotOutcome::Completed));
        }
        if cancelled {
            return ShotProgress::Finished(self.shutdown(ShotOutcome::Cancelled));
        }

        match self.targets.target_at(self.next_tick) {
            Some(target) => {
                self.context.set_target(target);
                let tick = self.next_tick;
                self.next_tick += 1;
                ShotProgress::Running { tick, target }
            }
            None => ShotProgress::Finished(self.shutdown(ShotOutcome::Completed)),
        }
    }

    fn shutdown(&mut self, outcome: ShotOutcome) -> ShotReport {
        if self.running {
            self.stage.stop();
            let _ = self.context.take();
            self.stage.force_word(STATE_WORDS.off_word());
            self.stage.release();
            self.context.set_target(POLARITY_SPLIT);
            self.running = false;
        }
        self.report(outcome)
    }

    fn report(&self, outcome: ShotOutcome) -> ShotReport {
        let stats = self.context.stats();
        ShotReport {
            outcome,
            ticks: self.next_tick,
            cycles: stats.cycles(),
            overruns: stats.overruns(),
        }
    }
}

impl<S: OutputStage> Drop for ShotSequencer<'_, S> {
    fn drop(&mut self) {
        // A dropped shot must never leave the bridge switching.
        let _ = self.shutdown(ShotOutcome::Cancelled);
    }
}
