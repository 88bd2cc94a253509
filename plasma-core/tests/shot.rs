use plasma_core::encoding::{PackedWord, STATE_WORDS};
use plasma_core::protocol::{FrameParser, Message, MessageType, encode_frame};
use plasma_core::shot::{
    CancelFlag, OutputStage, ShotConfig, ShotOutcome, ShotProgress, ShotSequencer, ShotTargets,
};
use plasma_core::waveform::{
    ARM_DELAY, POLARITY_SPLIT, TxFifo, WaveformContext, WaveformGenerator, next_state_for,
};

/// Periods per 1 ms tick at 20 µs per period.
const PERIODS_PER_TICK: usize = 50;

#[derive(Default)]
struct RecordingFifo {
    words: Vec<u32>,
}

impl TxFifo for RecordingFifo {
    fn write_word(&mut self, word: u32) {
        self.words.push(word);
    }
}

/// Output stage that records the forced words and whether the slice runs.
#[derive(Default)]
struct BenchStage {
    running: bool,
    enabled: bool,
    forced: Vec<u32>,
}

impl OutputStage for BenchStage {
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

#[test]
fn emitted_word_was_computed_one_period_earlier() {
    let context = WaveformContext::new();
    let initial = STATE_WORDS.arm_word(ARM_DELAY);
    context.install(WaveformGenerator::armed(STATE_WORDS, initial));
    let mut fifo = RecordingFifo::default();

    let targets = [0u16, 199, 150, 100, 42];
    for &target in &targets {
        context.set_target(target);
        assert!(context.on_period(&mut fifo));
    }

    assert_eq!(fifo.words[0], initial);
    for (n, window) in targets.windows(2).enumerate() {
        let emitted = fifo.words[n + 1];
        assert_eq!(emitted, next_state_for(&STATE_WORDS, window[0]));
        assert_ne!(emitted, next_state_for(&STATE_WORDS, window[1]));
    }
}

#[test]
fn received_table_drives_the_shot() {
    let table = [0u8, 50, 150, 199];
    let mut bytes = [0u8; 16];
    let len = encode_frame(MessageType::PwmTable, &table, &mut bytes).expect("encode");

    let mut parser = FrameParser::<64>::new();
    let payload = bytes[..len]
        .iter()
        .find_map(|&byte| parser.feed(byte).map(|frame| frame.payload.len()))
        .expect("frame completes");
    assert_eq!(payload, table.len());
    let frame = parser.frame().expect("frame");
    let Ok(Message::PwmTable(targets)) = frame.message() else {
        panic!("expected a target table");
    };

    let context = WaveformContext::new();
    let mut stage = BenchStage::default();
    let mut fifo = RecordingFifo::default();
    let mut shot = ShotSequencer::start(
        &mut stage,
        &context,
        ShotTargets::Table(targets),
        &ShotConfig::default(),
    )
    .expect("shot starts");

    let mut published = Vec::new();
    let report = loop {
        for _ in 0..PERIODS_PER_TICK {
            context.on_period(&mut fifo);
        }
        match shot.tick(false) {
            ShotProgress::Running { target, .. } => published.push(target),
            ShotProgress::Finished(report) => break report,
        }
    };
    drop(shot);

    assert_eq!(published, [0, 50, 150, 199]);
    assert_eq!(report.outcome, ShotOutcome::Completed);
    assert_eq!(report.cycles, 250);
    assert_eq!(stage.forced, [STATE_WORDS.off_word()]);
    assert!(!stage.running && !stage.enabled);

    assert_eq!(fifo.words[0], STATE_WORDS.arm_word(ARM_DELAY));
    let drive_words = fifo
        .words
        .iter()
        .filter(|&&word| word == next_state_for(&STATE_WORDS, 199))
        .count();
    assert_eq!(drive_words, PERIODS_PER_TICK - 1);
    assert!(
        fifo.words
            .iter()
            .all(|&word| PackedWord::unpack(word).delay <= 450)
    );
}

#[test]
fn shot_rearms_after_cancellation() {
    let context = WaveformContext::new();
    let cancel = CancelFlag::new();
    let mut stage = BenchStage::default();

    {
        let mut shot = ShotSequencer::start(
            &mut stage,
            &context,
            ShotTargets::Ramp { pulse_count: 199 },
            &ShotConfig::default(),
        )
        .expect("first shot starts");

        let mut ticks = 0;
        let report = loop {
            if ticks == 10 {
                cancel.cancel();
            }
            match shot.tick(cancel.take()) {
                ShotProgress::Running { .. } => ticks += 1,
                ShotProgress::Finished(report) => break report,
            }
        };
        assert_eq!(report.outcome, ShotOutcome::Cancelled);
        assert_eq!(report.ticks, 10);
    }

    assert!(!context.is_armed());
    assert_eq!(context.target(), POLARITY_SPLIT);
    assert!(!cancel.is_set());

    let mut shot = ShotSequencer::start(
        &mut stage,
        &context,
        ShotTargets::Ramp { pulse_count: 0 },
        &ShotConfig::default(),
    )
    .expect("second shot re-arms");
    assert!(matches!(shot.tick(false), ShotProgress::Running { target: 0, .. }));
    assert!(matches!(
        shot.tick(false),
        ShotProgress::Finished(report) if report.outcome == ShotOutcome::Completed
    ));
}
