//! Firmware side of the telemetry ring.
//!
//! Wraps the shared recorder with an Embassy timestamp and mirrors every
//! record to defmt (or stdout on the host) as it is written.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::time::Duration;

use embassy_time::Instant;
use plasma_core::protocol::{FrameError, MessageType};
use plasma_core::shot::ShotReport;
use plasma_core::status::SystemState;
use plasma_core::telemetry::{
    EventId, TelemetryEventKind, TelemetryInstant, TelemetryPayload, TelemetryRecord,
    TelemetryRecorder,
};

/// Embassy instant usable as a telemetry timestamp.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub const fn into_embassy(self) -> Instant {
        self.0
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(value: Instant) -> Self {
        Self(value)
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_duration_since(earlier.0).as_micros())
    }
}

/// Recorder that logs each record as it lands in the ring.
pub struct FirmwareTelemetry {
    recorder: TelemetryRecorder<FirmwareInstant>,
}

impl FirmwareTelemetry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            recorder: TelemetryRecorder::new(),
        }
    }

    #[must_use]
    pub fn recorder(&self) -> &TelemetryRecorder<FirmwareInstant> {
        &self.recorder
    }

    pub fn link(&mut self, up: bool, previous: SystemState, at: FirmwareInstant) -> EventId {
        let id = self.recorder.record_link(up, previous, at);
        self.log_latest();
        id
    }

    pub fn frame_accepted(
        &mut self,
        kind: MessageType,
        length: usize,
        stored: usize,
        at: FirmwareInstant,
    ) -> EventId {
        let id = self.recorder.record_frame_accepted(kind, length, stored, at);
        self.log_latest();
        id
    }

    pub fn frame_rejected(&mut self, error: FrameError, at: FirmwareInstant) -> EventId {
        let id = self.recorder.record_frame_rejected(error, at);
        self.log_latest();
        id
    }

    /// A frame passed framing checks but its payload was refused.
    pub fn payload_rejected(&mut self, kind: MessageType, at: FirmwareInstant) -> EventId {
        let id = self.recorder.record(
            TelemetryEventKind::PayloadRejected(kind),
            TelemetryPayload::none(),
            at,
        );
        self.log_latest();
        id
    }

    pub fn shot_started(&mut self, at: FirmwareInstant) -> EventId {
        let id = self.recorder.record_shot_started(at);
        self.log_latest();
        id
    }

    pub fn shot_finished(&mut self, report: &ShotReport, at: FirmwareInstant) -> EventId {
        let id = self.recorder.record_shot_finished(report, at);
        // An overrun adds a second record; log both.
        for record in self.recorder.oldest_first().filter(|record| record.id >= id) {
            emit_record(record);
        }
        id
    }

    fn log_latest(&self) {
        if let Some(record) = self.recorder.latest() {
            emit_record(record);
        }
    }
}

impl Default for FirmwareTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Short suffix describing the payload.
fn describe_payload(payload: &TelemetryPayload, out: &mut heapless::String<64>) {
    use core::fmt::Write;

    let _ = match payload {
        TelemetryPayload::None => Ok(()),
        TelemetryPayload::Frame(frame) => write!(out, "len={} stored={}", frame.length, frame.stored),
        TelemetryPayload::Rejection(error) => write!(out, "{error}"),
        TelemetryPayload::Shot(shot) => write!(
            out,
            "ticks={} cycles={} overruns={}",
            shot.ticks, shot.cycles, shot.overruns
        ),
        TelemetryPayload::State(state) => write!(out, "from={state}"),
    };
}

#[cfg(target_os = "none")]
fn emit_record(record: &TelemetryRecord<FirmwareInstant>) {
    let mut details = heapless::String::new();
    describe_payload(&record.details, &mut details);
    defmt::info!(
        "telemetry: #{} {} {} t={}us",
        record.id,
        defmt::Display2Format(&record.event),
        details.as_str(),
        record.timestamp.into_embassy().as_micros()
    );
}

#[cfg(not(target_os = "none"))]
fn emit_record(record: &TelemetryRecord<FirmwareInstant>) {
    let mut details = heapless::String::new();
    describe_payload(&record.details, &mut details);
    println!(
        "telemetry: #{} {} {} t={}us",
        record.id,
        record.event,
        details.as_str(),
        record.timestamp.into_embassy().as_micros()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use plasma_core::shot::ShotOutcome;

    fn micros(value: u64) -> FirmwareInstant {
        FirmwareInstant::from(Instant::from_micros(value))
    }

    #[test]
    fn instants_measure_shot_duration() {
        let mut telemetry = FirmwareTelemetry::new();
        telemetry.shot_started(micros(1_000));
        let report = ShotReport {
            outcome: ShotOutcome::Completed,
            ticks: 3,
            cycles: 200,
            overruns: 2,
        };
        telemetry.shot_finished(&report, micros(5_000));

        let events: heapless::Vec<_, 4> = telemetry
            .recorder()
            .oldest_first()
            .map(|record| record.event)
            .collect();
        assert_eq!(
            events.as_slice(),
            [
                TelemetryEventKind::ShotStarted,
                TelemetryEventKind::ShotFinished(ShotOutcome::Completed),
                TelemetryEventKind::Overrun,
            ]
        );
        match telemetry.recorder().oldest_first().nth(1).unwrap().details {
            TelemetryPayload::Shot(shot) => {
                assert_eq!(shot.duration, Some(Duration::from_millis(4)));
            }
            _ => panic!("expected shot payload"),
        }
    }

    #[test]
    fn refused_payload_is_tagged_with_frame_type() {
        let mut telemetry = FirmwareTelemetry::new();
        telemetry.payload_rejected(MessageType::Manual, micros(10));
        let record = telemetry.recorder().latest().unwrap();
        assert_eq!(
            record.event,
            TelemetryEventKind::PayloadRejected(MessageType::Manual)
        );
        assert_eq!(record.details, TelemetryPayload::None);
    }

    #[test]
    fn rejection_payload_renders_reason() {
        let mut details = heapless::String::new();
        describe_payload(
            &TelemetryPayload::Rejection(FrameError::MissingEnd(0x42)),
            &mut details,
        );
        assert_eq!(details.as_str(), "missing end byte (got 0x42)");
    }
}
