//! Host model of the pulse driver.
//!
//! Wires the frame parser, the waveform context and a recording output stage
//! together the way the firmware tasks do, with the period interrupt replaced
//! by a loop that runs one tick's worth of periods between sequencer ticks.

use plasma_core::encoding::{STATE_WORDS, StateWords};
use plasma_core::protocol::{
    ConfigCommand, EncodeError, FRAME_OVERHEAD, FrameError, FrameEvent, FrameParser,
    LinkCounters, Message, MessageError, MessageType, encode_frame,
};
use plasma_core::shot::{
    CancelFlag, OutputStage, ShotConfig, ShotError, ShotProgress, ShotReport, ShotSequencer,
    ShotTargets,
};
use plasma_core::status::{SystemState, SystemStateCell};
use plasma_core::topology::SwitchSet;
use plasma_core::waveform::{PERIOD_NANOS, TxFifo, WaveformContext};

/// Builds a complete wire frame for `payload`.
pub fn build_frame(kind: MessageType, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut frame = vec![0u8; payload.len() + FRAME_OVERHEAD];
    let len = encode_frame(kind, payload, &mut frame)?;
    frame.truncate(len);
    Ok(frame)
}

/// Stand-in for the PIO TX FIFO.
#[derive(Default)]
struct RecordingFifo {
    words: Vec<u32>,
}

impl TxFifo for RecordingFifo {
    fn write_word(&mut self, word: u32) {
        self.words.push(word);
    }
}

/// Output stage that remembers what the hardware would have been told.
#[derive(Debug, Default)]
pub struct SimulatedStage {
    pub enabled: bool,
    pub running: bool,
    pub forced: Vec<u32>,
}

impl OutputStage for SimulatedStage {
    fn prepare(&mut self) {
        self.enabled = true;
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn force_word(&mut self, word: u32) {
        self.forced.push(word);
    }

    fn release(&mut self) {
        self.enabled = false;
    }
}

/// Words emitted while one target was live.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TickTrace {
    pub tick: usize,
    pub target: u16,
    pub words: usize,
    /// Steady-state word for the target (the first word of the window still
    /// reflects the previous target).
    pub last_word: Option<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShotTrace {
    pub arm_word: u32,
    /// Ticks the sequencer planned, including the shutdown tick.
    pub planned_ticks: usize,
    /// Periods the armed generator free-wheeled before the first target.
    pub arm_periods: usize,
    pub ticks: Vec<TickTrace>,
    pub report: ShotReport,
    /// Word forced onto the pins at shutdown.
    pub parked_word: Option<u32>,
}

/// What the device did in response to input bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeviceEvent {
    FrameAccepted {
        kind: MessageType,
        length: usize,
        stored: usize,
    },
    FrameRejected(FrameError),
    PayloadRejected {
        kind: MessageType,
        error: MessageError,
    },
    ShotFired(ShotTrace),
    ShotRefused(ShotError),
    Holding {
        pattern: SwitchSet,
        word: u32,
    },
    Configured(ConfigCommand),
}

pub struct SimulatedDevice {
    parser: Box<FrameParser>,
    context: WaveformContext,
    stage: SimulatedStage,
    config: ShotConfig,
    state: SystemStateCell,
    cancel_at: Option<usize>,
    last_report: Option<ShotReport>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        let state = SystemStateCell::new();
        state.set(SystemState::Idle);
        Self {
            parser: Box::new(FrameParser::new()),
            context: WaveformContext::new(),
            stage: SimulatedStage::default(),
            config: ShotConfig::default(),
            state,
            cancel_at: None,
            last_report: None,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state.get()
    }

    pub fn counters(&self) -> &LinkCounters {
        self.parser.counters()
    }

    pub fn config(&self) -> &ShotConfig {
        &self.config
    }

    pub fn stage(&self) -> &SimulatedStage {
        &self.stage
    }

    pub fn last_report(&self) -> Option<&ShotReport> {
        self.last_report.as_ref()
    }

    /// Simulated periods between two sequencer ticks.
    pub fn periods_per_tick(&self) -> usize {
        let nanos = self.config.tick_period.as_nanos() / u128::from(PERIOD_NANOS);
        usize::try_from(nanos).unwrap_or(usize::MAX).max(1)
    }

    /// Cancels the next shot just before it would publish target `tick`.
    pub fn cancel_at(&mut self, tick: usize) {
        self.cancel_at = Some(tick);
    }

    /// Pushes raw bytes through the parser, acting on each completed frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        for &byte in bytes {
            let event = self.parser.push(byte);
            if let Some(state) = event.system_state() {
                self.state.set_unless(SystemState::Firing, state);
            }

            match event {
                FrameEvent::Completed { kind, length } => {
                    events.push(DeviceEvent::FrameAccepted {
                        kind,
                        length,
                        stored: self.parser.received_count(),
                    });
                    let payload = self
                        .parser
                        .frame()
                        .map(|frame| frame.payload.to_vec())
                        .unwrap_or_default();
                    events.push(self.dispatch(kind, &payload));
                }
                FrameEvent::Rejected(error) => events.push(DeviceEvent::FrameRejected(error)),
                FrameEvent::None
                | FrameEvent::Started
                | FrameEvent::Store { .. }
                | FrameEvent::Dropped { .. } => {}
            }
        }
        events
    }

    /// Runs a diagnostic ramp shot without a frame.
    pub fn fire_ramp(&mut self, pulse_count: u16) -> DeviceEvent {
        self.fire(ShotTargets::Ramp { pulse_count })
    }

    fn dispatch(&mut self, kind: MessageType, payload: &[u8]) -> DeviceEvent {
        let event = match Message::decode(kind, payload) {
            Ok(Message::PwmTable(table)) => return self.fire(ShotTargets::Table(table)),
            Ok(Message::Manual(manual)) => {
                let word = StateWords::hold_word(manual.pattern);
                self.stage.prepare();
                self.stage.force_word(word);
                DeviceEvent::Holding {
                    pattern: manual.pattern,
                    word,
                }
            }
            Ok(Message::Config(command)) => {
                self.config.apply(command);
                DeviceEvent::Configured(command)
            }
            Err(error) => DeviceEvent::PayloadRejected { kind, error },
        };
        self.state.set(SystemState::Idle);
        event
    }

    fn fire(&mut self, targets: ShotTargets<'_>) -> DeviceEvent {
        let periods = self.periods_per_tick();
        let cancel_at = self.cancel_at.take();
        let cancel = CancelFlag::new();
        let arm_word = STATE_WORDS.arm_word(self.config.arm_delay);
        let mut fifo = RecordingFifo::default();
        let mut ticks = Vec::new();
        self.stage.forced.clear();

        let mut shot =
            match ShotSequencer::start(&mut self.stage, &self.context, targets, &self.config) {
                Ok(shot) => shot,
                Err(error) => {
                    self.state.set(SystemState::Idle);
                    return DeviceEvent::ShotRefused(error);
                }
            };
        self.state.set(SystemState::Firing);
        let planned_ticks = shot.total_ticks();

        run_periods(&self.context, &mut fifo, periods);
        let arm_periods = fifo.words.len();

        let report = loop {
            if cancel_at == Some(ticks.len()) {
                cancel.cancel();
            }
            match shot.tick(cancel.take()) {
                ShotProgress::Running { tick, target } => {
                    let before = fifo.words.len();
                    run_periods(&self.context, &mut fifo, periods);
                    ticks.push(TickTrace {
                        tick,
                        target,
                        words: fifo.words.len() - before,
                        last_word: fifo.words.last().copied(),
                    });
                }
                ShotProgress::Finished(report) => break report,
            }
        };
        drop(shot);

        self.state.set(SystemState::Idle);
        self.last_report = Some(report);
        DeviceEvent::ShotFired(ShotTrace {
            arm_word,
            planned_ticks,
            arm_periods,
            ticks,
            report,
            parked_word: self.stage.forced.last().copied(),
        })
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn run_periods(context: &WaveformContext, fifo: &mut RecordingFifo, periods: usize) {
    for _ in 0..periods {
        context.on_period(fifo);
    }
}
