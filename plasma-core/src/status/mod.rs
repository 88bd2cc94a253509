//! Coarse system state and the status LED pattern derived from it.

use core::fmt;
use core::time::Duration;

use portable_atomic::{AtomicU8, Ordering};

/// Process-wide state published by the link and shot paths.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SystemState {
    /// No host has opened the serial link yet.
    AwaitingLink,
    /// Link is up, nothing pending.
    Idle,
    /// A frame start byte arrived and the frame is still being assembled.
    Receiving,
    /// A complete target table is waiting to be fired.
    DataReady,
    /// A shot is running.
    Firing,
}

impl SystemState {
    const fn to_raw(self) -> u8 {
        match self {
            SystemState::AwaitingLink => 0,
            SystemState::Idle => 1,
            SystemState::Receiving => 2,
            SystemState::DataReady => 3,
            SystemState::Firing => 4,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => SystemState::Idle,
            2 => SystemState::Receiving,
            3 => SystemState::DataReady,
            4 => SystemState::Firing,
            _ => SystemState::AwaitingLink,
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SystemState::AwaitingLink => "awaiting-link",
            SystemState::Idle => "idle",
            SystemState::Receiving => "receiving",
            SystemState::DataReady => "data-ready",
            SystemState::Firing => "firing",
        };
        f.write_str(label)
    }
}

/// Single-byte cell holding the current [`SystemState`].
pub struct SystemStateCell(AtomicU8);

impl SystemStateCell {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(SystemState::AwaitingLink.to_raw()))
    }

    pub fn set(&self, state: SystemState) {
        self.0.store(state.to_raw(), Ordering::Release);
    }

    #[must_use]
    pub fn get(&self) -> SystemState {
        SystemState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Moves to `next` unless the current state is `hold`.
    ///
    /// Lets the link path report frame progress without clobbering a state
    /// owned by the shot path.
    pub fn set_unless(&self, hold: SystemState, next: SystemState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (raw != hold.to_raw()).then_some(next.to_raw())
            })
            .is_ok()
    }
}

impl Default for SystemStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Repeating on/off pattern: a number of equal blips at the start of each period.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlinkPattern {
    pub period: Duration,
    pub on_time: Duration,
    pub blips: u8,
}

impl BlinkPattern {
    const fn millis(period: u64, on_time: u64, blips: u8) -> Self {
        Self {
            period: Duration::from_millis(period),
            on_time: Duration::from_millis(on_time),
            blips,
        }
    }

    /// Pattern shown for each state.
    #[must_use]
    pub const fn for_state(state: SystemState) -> Self {
        match state {
            SystemState::AwaitingLink => Self::millis(1_000, 500, 1),
            SystemState::Idle => Self::millis(2_000, 100, 1),
            SystemState::Receiving => Self::millis(100, 50, 1),
            SystemState::DataReady => Self::millis(1_000, 100, 2),
            SystemState::Firing => Self::millis(1, 1, 1),
        }
    }

    /// LED level `elapsed` into the pattern.
    #[must_use]
    pub fn level_at(&self, elapsed: Duration) -> bool {
        let period = self.period.as_micros();
        if period == 0 {
            return false;
        }
        let on = self.on_time.as_micros();
        if on == 0 {
            return false;
        }
        if on >= period {
            return true;
        }

        let phase = elapsed.as_micros() % period;
        let slot = on * 2;
        let index = phase / slot;
        index < u128::from(self.blips) && phase % slot < on
    }
}

/// Drives the status LED from the published system state.
pub struct StatusIndicator {
    state: SystemState,
    entered_at: Duration,
}

impl StatusIndicator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SystemState::AwaitingLink,
            entered_at: Duration::ZERO,
        }
    }

    /// Returns the LED level for `now` (monotonic time since boot).
    ///
    /// The pattern restarts whenever the observed state changes so a new
    /// state is visible immediately.
    pub fn tick(&mut self, state: SystemState, now: Duration) -> bool {
        if state != self.state {
            self.state = state;
            self.entered_at = now;
        }
        let elapsed = now.saturating_sub(self.entered_at);
        BlinkPattern::for_state(state).level_at(elapsed)
    }
}

impl Default for StatusIndicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn state_cell_round_trips_every_variant() {
        let cell = SystemStateCell::new();
        assert_eq!(cell.get(), SystemState::AwaitingLink);
        for state in [
            SystemState::Idle,
            SystemState::Receiving,
            SystemState::DataReady,
            SystemState::Firing,
            SystemState::AwaitingLink,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn set_unless_leaves_held_state_alone() {
        let cell = SystemStateCell::new();
        cell.set(SystemState::Firing);
        assert!(!cell.set_unless(SystemState::Firing, SystemState::Receiving));
        assert_eq!(cell.get(), SystemState::Firing);

        cell.set(SystemState::Idle);
        assert!(cell.set_unless(SystemState::Firing, SystemState::Receiving));
        assert_eq!(cell.get(), SystemState::Receiving);
    }

    #[test]
    fn awaiting_link_blinks_at_one_hertz() {
        let pattern = BlinkPattern::for_state(SystemState::AwaitingLink);
        assert!(pattern.level_at(ms(0)));
        assert!(pattern.level_at(ms(499)));
        assert!(!pattern.level_at(ms(500)));
        assert!(!pattern.level_at(ms(999)));
        assert!(pattern.level_at(ms(1_000)));
    }

    #[test]
    fn data_ready_shows_two_blips() {
        let pattern = BlinkPattern::for_state(SystemState::DataReady);
        assert!(pattern.level_at(ms(50)));
        assert!(!pattern.level_at(ms(150)));
        assert!(pattern.level_at(ms(250)));
        assert!(!pattern.level_at(ms(350)));
        assert!(!pattern.level_at(ms(600)));
    }

    #[test]
    fn firing_is_solid() {
        let pattern = BlinkPattern::for_state(SystemState::Firing);
        for t in [0, 1, 7, 999] {
            assert!(pattern.level_at(ms(t)));
        }
    }

    #[test]
    fn zero_on_time_stays_dark() {
        let pattern = BlinkPattern {
            period: Duration::from_millis(500),
            on_time: Duration::ZERO,
            blips: 3,
        };
        for t in [0, 1, 250, 499] {
            assert!(!pattern.level_at(ms(t)));
        }
    }

    #[test]
    fn indicator_restarts_pattern_on_state_change() {
        let mut indicator = StatusIndicator::new();
        assert!(!indicator.tick(SystemState::AwaitingLink, ms(700)));
        assert!(indicator.tick(SystemState::Idle, ms(700)));
        assert!(!indicator.tick(SystemState::Idle, ms(850)));
    }
}
