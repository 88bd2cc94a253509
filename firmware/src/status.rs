#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! The link task, the shot task and the LED task only meet here: lightweight
//! atomics carry the published system state, the cancel request and a few
//! counters so every task can build a `StatusSnapshot` without locking.

use core::time::Duration;

use embassy_time::Instant;
use plasma_core::shot::{CancelFlag, ShotOutcome, ShotReport};
use plasma_core::status::{SystemState, SystemStateCell};
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// State shown on the LED and used to refuse manual frames while firing.
pub static SYSTEM_STATE: SystemStateCell = SystemStateCell::new();
/// Raised by the link task when the host goes away mid-shot.
pub static CANCEL: CancelFlag = CancelFlag::new();

static LINK_ATTACHED: AtomicBool = AtomicBool::new(false);
static SHOTS_FIRED: AtomicU32 = AtomicU32::new(0);
static SHOTS_CANCELLED: AtomicU32 = AtomicU32::new(0);
static LAST_OVERRUNS: AtomicU32 = AtomicU32::new(0);
/// Timestamp (µs, +1) of the last shot end.
static LAST_SHOT_MICROS: AtomicU32 = AtomicU32::new(0);

/// Point-in-time view for log lines.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatusSnapshot {
    pub state: SystemState,
    pub link_attached: bool,
    pub shots_fired: u32,
    pub shots_cancelled: u32,
    pub last_overruns: u32,
    pub since_last_shot: Option<Duration>,
}

fn encode_micros(micros: u32) -> u32 {
    micros.wrapping_add(1)
}

fn decode_micros(raw: u32) -> Option<u32> {
    if raw == 0 {
        None
    } else {
        Some(raw.wrapping_sub(1))
    }
}

fn micros_from_instant(instant: Instant) -> u32 {
    u32::try_from(instant.as_micros()).unwrap_or(u32::MAX - 1)
}

fn duration_since(now: Instant, raw: u32) -> Option<Duration> {
    let stored = decode_micros(raw)?;
    let delta = micros_from_instant(now).wrapping_sub(stored);
    Some(Duration::from_micros(u64::from(delta)))
}

/// Records whether the host holds the CDC port open (DTR asserted).
///
/// Attaching moves the state to Idle, detaching to AwaitingLink unless a shot
/// is still winding down.
pub fn set_link_attached(attached: bool) {
    LINK_ATTACHED.store(attached, Ordering::Release);
    let next = if attached {
        SystemState::Idle
    } else {
        SystemState::AwaitingLink
    };
    SYSTEM_STATE.set_unless(SystemState::Firing, next);
}

#[must_use]
pub fn link_attached() -> bool {
    LINK_ATTACHED.load(Ordering::Acquire)
}

/// Publishes a state implied by frame progress; never overrides Firing.
pub fn publish_link_state(state: SystemState) {
    SYSTEM_STATE.set_unless(SystemState::Firing, state);
}

#[must_use]
pub fn firing() -> bool {
    SYSTEM_STATE.get() == SystemState::Firing
}

/// Marks a shot as running and discards any stale cancel request.
pub fn begin_shot() {
    let _ = CANCEL.take();
    SYSTEM_STATE.set(SystemState::Firing);
}

/// Records the end of a shot and hands the state back to the link.
pub fn finish_shot(report: &ShotReport, now: Instant) {
    let counter = match report.outcome {
        ShotOutcome::Completed => &SHOTS_FIRED,
        ShotOutcome::Cancelled => &SHOTS_CANCELLED,
    };
    counter.fetch_add(1, Ordering::Relaxed);
    LAST_OVERRUNS.store(report.overruns, Ordering::Relaxed);
    LAST_SHOT_MICROS.store(encode_micros(micros_from_instant(now)), Ordering::Relaxed);

    let next = if link_attached() {
        SystemState::Idle
    } else {
        SystemState::AwaitingLink
    };
    SYSTEM_STATE.set(next);
}

/// Builds a [`StatusSnapshot`] from the stored counters.
#[must_use]
pub fn snapshot(now: Instant) -> StatusSnapshot {
    StatusSnapshot {
        state: SYSTEM_STATE.get(),
        link_attached: link_attached(),
        shots_fired: SHOTS_FIRED.load(Ordering::Relaxed),
        shots_cancelled: SHOTS_CANCELLED.load(Ordering::Relaxed),
        last_overruns: LAST_OVERRUNS.load(Ordering::Relaxed),
        since_last_shot: duration_since(now, LAST_SHOT_MICROS.load(Ordering::Relaxed)),
    }
}
