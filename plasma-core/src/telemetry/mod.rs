//! Telemetry event catalog and a fixed-size history of recent events.
//!
//! Events carry compact numeric codes so they can be mirrored over a
//! diagnostics channel, and typed payloads for the emulator transcript and
//! the firmware's log lines. Everything here is `no_std` and allocation free.

use core::{convert::TryFrom, fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::protocol::{FrameError, MessageType};
use crate::shot::{ShotOutcome, ShotReport};
use crate::status::SystemState;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    LinkUp,
    LinkDown,
    FrameAccepted(MessageType),
    FrameRejected,
    PayloadRejected(MessageType),
    ShotStarted,
    ShotFinished(ShotOutcome),
    Overrun,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::LinkUp => f.write_str("link-up"),
            TelemetryEventKind::LinkDown => f.write_str("link-down"),
            TelemetryEventKind::FrameAccepted(kind) => write!(f, "frame-accepted {kind}"),
            TelemetryEventKind::FrameRejected => f.write_str("frame-rejected"),
            TelemetryEventKind::PayloadRejected(kind) => write!(f, "payload-rejected {kind}"),
            TelemetryEventKind::ShotStarted => f.write_str("shot-started"),
            TelemetryEventKind::ShotFinished(ShotOutcome::Completed) => {
                f.write_str("shot-completed")
            }
            TelemetryEventKind::ShotFinished(ShotOutcome::Cancelled) => {
                f.write_str("shot-cancelled")
            }
            TelemetryEventKind::Overrun => f.write_str("overrun"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const LINK_UP_CODE: u16 = 0x0001;
    const LINK_DOWN_CODE: u16 = 0x0002;
    const FRAME_REJECTED_CODE: u16 = 0x0003;
    const SHOT_STARTED_CODE: u16 = 0x0004;
    const SHOT_COMPLETED_CODE: u16 = 0x0005;
    const SHOT_CANCELLED_CODE: u16 = 0x0006;
    const OVERRUN_CODE: u16 = 0x0007;
    const FRAME_ACCEPTED_BASE: u16 = 0x0100;
    const PAYLOAD_REJECTED_BASE: u16 = 0x0200;

    /// Encodes the event into a compact transport-friendly discriminant.
    ///
    /// Frame-related codes embed the message type byte in the low bits.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::LinkUp => Self::LINK_UP_CODE,
            TelemetryEventKind::LinkDown => Self::LINK_DOWN_CODE,
            TelemetryEventKind::FrameAccepted(kind) => {
                Self::FRAME_ACCEPTED_BASE | kind.as_byte() as u16
            }
            TelemetryEventKind::FrameRejected => Self::FRAME_REJECTED_CODE,
            TelemetryEventKind::PayloadRejected(kind) => {
                Self::PAYLOAD_REJECTED_BASE | kind.as_byte() as u16
            }
            TelemetryEventKind::ShotStarted => Self::SHOT_STARTED_CODE,
            TelemetryEventKind::ShotFinished(ShotOutcome::Completed) => Self::SHOT_COMPLETED_CODE,
            TelemetryEventKind::ShotFinished(ShotOutcome::Cancelled) => Self::SHOT_CANCELLED_CODE,
            TelemetryEventKind::Overrun => Self::OVERRUN_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::LINK_UP_CODE => TelemetryEventKind::LinkUp,
            Self::LINK_DOWN_CODE => TelemetryEventKind::LinkDown,
            Self::FRAME_REJECTED_CODE => TelemetryEventKind::FrameRejected,
            Self::SHOT_STARTED_CODE => TelemetryEventKind::ShotStarted,
            Self::SHOT_COMPLETED_CODE => TelemetryEventKind::ShotFinished(ShotOutcome::Completed),
            Self::SHOT_CANCELLED_CODE => TelemetryEventKind::ShotFinished(ShotOutcome::Cancelled),
            Self::OVERRUN_CODE => TelemetryEventKind::Overrun,
            value if value & 0xFF00 == Self::FRAME_ACCEPTED_BASE => {
                message_from_low_byte(value).map_or(TelemetryEventKind::Custom(value), |kind| {
                    TelemetryEventKind::FrameAccepted(kind)
                })
            }
            value if value & 0xFF00 == Self::PAYLOAD_REJECTED_BASE => {
                message_from_low_byte(value).map_or(TelemetryEventKind::Custom(value), |kind| {
                    TelemetryEventKind::PayloadRejected(kind)
                })
            }
            other => TelemetryEventKind::Custom(other),
        }
    }
}

fn message_from_low_byte(code: u16) -> Option<MessageType> {
    u8::try_from(code & 0x00FF)
        .ok()
        .and_then(MessageType::from_byte)
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    Frame(FrameTelemetry),
    Rejection(FrameError),
    Shot(ShotTelemetry),
    /// State the link was in when it changed.
    State(SystemState),
}

impl TelemetryPayload {
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Accepted frame metadata.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameTelemetry {
    /// Declared payload length.
    pub length: u16,
    /// Bytes actually stored (less than `length` after an overflow).
    pub stored: u16,
}

impl FrameTelemetry {
    #[must_use]
    pub const fn new(length: u16, stored: u16) -> Self {
        Self { length, stored }
    }

    #[must_use]
    pub const fn truncated(&self) -> bool {
        self.stored < self.length
    }
}

/// Shot summary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShotTelemetry {
    pub ticks: u16,
    pub cycles: u32,
    pub overruns: u32,
    pub duration: Option<Duration>,
}

impl ShotTelemetry {
    #[must_use]
    pub fn from_report(report: &ShotReport, duration: Option<Duration>) -> Self {
        Self {
            ticks: truncate_ticks(report.ticks),
            cycles: report.cycles,
            overruns: report.overruns,
            duration,
        }
    }
}

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    shot_started_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            shot_started_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn record_link(&mut self, up: bool, previous: SystemState, timestamp: TInstant) -> EventId {
        let event = if up {
            TelemetryEventKind::LinkUp
        } else {
            TelemetryEventKind::LinkDown
        };
        self.record(event, TelemetryPayload::State(previous), timestamp)
    }

    pub fn record_frame_accepted(
        &mut self,
        kind: MessageType,
        length: usize,
        stored: usize,
        timestamp: TInstant,
    ) -> EventId {
        let payload = TelemetryPayload::Frame(FrameTelemetry::new(
            truncate_len(length),
            truncate_len(stored),
        ));
        self.record(TelemetryEventKind::FrameAccepted(kind), payload, timestamp)
    }

    pub fn record_frame_rejected(&mut self, error: FrameError, timestamp: TInstant) -> EventId {
        self.record(
            TelemetryEventKind::FrameRejected,
            TelemetryPayload::Rejection(error),
            timestamp,
        )
    }

    /// Records the start of a shot and remembers when it began.
    pub fn record_shot_started(&mut self, timestamp: TInstant) -> EventId {
        self.shot_started_at = Some(timestamp);
        self.record(
            TelemetryEventKind::ShotStarted,
            TelemetryPayload::none(),
            timestamp,
        )
    }

    /// Records the end of a shot, plus an overrun event when any were counted.
    pub fn record_shot_finished(&mut self, report: &ShotReport, timestamp: TInstant) -> EventId {
        let duration = self
            .shot_started_at
            .take()
            .map(|start| timestamp.saturating_duration_since(start));
        let payload = TelemetryPayload::Shot(ShotTelemetry::from_report(report, duration));

        let id = self.record(
            TelemetryEventKind::ShotFinished(report.outcome),
            payload,
            timestamp,
        );
        if report.overruns != 0 {
            self.record(TelemetryEventKind::Overrun, payload, timestamp);
        }
        id
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_len(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

fn truncate_ticks(ticks: usize) -> u16 {
    u16::try_from(ticks).unwrap_or(u16::MAX)
}
