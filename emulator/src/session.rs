use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use plasma_core::protocol::{
    ConfigParam, EncodeError, MAX_PAYLOAD_LEN, MessageType, PULSE_CAPACITY,
};
use plasma_core::shot::BASELINE_PULSE_COUNT;

use crate::device::{DeviceEvent, ShotTrace, SimulatedDevice, build_frame};

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "pulse",
        "pulse table <t0> [t1 ...] | pulse ramp [count]  - fire a shot",
    ),
    (
        "manual",
        "manual <s1> <s2> <s3> <s4>      - hold a static switch pattern (0/1 each)",
    ),
    (
        "config",
        "config <arm-delay|tick-period-us> <value>  - update a shot parameter",
    ),
    (
        "corrupt",
        "corrupt <t0> [t1 ...]           - send a table frame with a bad checksum",
    ),
    (
        "send",
        "send <hex bytes>                - push raw bytes into the parser",
    ),
    (
        "cancel",
        "cancel <tick>                   - drop the link during the next shot",
    ),
    (
        "emit",
        "emit <path>                     - write the last frame's bytes to a file",
    ),
    (
        "status",
        "status                          - show link counters and shot state",
    ),
    (
        "help",
        "help [topic]                    - show help for a command",
    ),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Ramp,
    Table,
    Corrupt,
}

impl TranscriptProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Ramp => "transcripts/emulator-ramp.log",
            TranscriptProfile::Table => "transcripts/emulator-table.log",
            TranscriptProfile::Corrupt => "transcripts/emulator-corrupt.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Ramp => "Plasma pulse emulator ramp transcript",
            TranscriptProfile::Table => "Plasma pulse emulator table transcript",
            TranscriptProfile::Corrupt => "Plasma pulse emulator corrupted-frame transcript",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("ramp") {
            Ok(Self::Ramp)
        } else if tag.eq_ignore_ascii_case("table") {
            Ok(Self::Table)
        } else if tag.eq_ignore_ascii_case("corrupt") {
            Ok(Self::Corrupt)
        } else {
            Err(format!("Unknown transcript profile `{tag}`"))
        }
    }
}

pub struct Session {
    device: SimulatedDevice,
    transcript: TranscriptLogger,
    started_at: HostInstant,
    last_frame: Option<Vec<u8>>,
}

impl Session {
    pub fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(profile)?;
        Ok(Self::with_transcript(transcript))
    }

    /// Session whose transcript is discarded.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self::with_transcript(TranscriptLogger::discard())
    }

    fn with_transcript(transcript: TranscriptLogger) -> Self {
        Self {
            device: SimulatedDevice::new(),
            transcript,
            started_at: HostInstant::now(),
            last_frame: None,
        }
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let mut words = trimmed.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        let lines = match verb.as_str() {
            "help" => help_lines(args.first().copied()),
            "pulse" => self.handle_pulse(&args),
            "manual" => self.handle_manual(&args),
            "config" => self.handle_config(&args),
            "corrupt" => self.handle_corrupt(&args),
            "send" => self.handle_send(&args),
            "cancel" => self.handle_cancel(&args),
            "emit" => self.handle_emit(&args),
            "status" => self.status_lines(),
            other => vec![format!("ERR syntax unknown command `{other}`")],
        };

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn handle_pulse(&mut self, args: &[&str]) -> Vec<String> {
        match args.split_first() {
            Some((&"table", targets)) => match parse_targets(targets) {
                Ok(table) => self.send_frame(MessageType::PwmTable, &table),
                Err(message) => vec![message],
            },
            Some((&"ramp", rest)) => {
                let count = match rest.first() {
                    Some(raw) => match raw.parse::<u16>() {
                        Ok(count) => count,
                        Err(_) => return vec![format!("ERR syntax bad ramp length `{raw}`")],
                    },
                    None => BASELINE_PULSE_COUNT,
                };
                let mut lines = vec![format!("ramp 0..={count} (diagnostic, no frame)")];
                let event = self.device.fire_ramp(count);
                render_event(&event, &mut lines);
                lines
            }
            _ => vec!["ERR syntax expected `pulse table ...` or `pulse ramp`".to_string()],
        }
    }

    fn handle_manual(&mut self, args: &[&str]) -> Vec<String> {
        let switches: Result<Vec<u8>, _> = args.iter().map(|raw| raw.parse::<u8>()).collect();
        match switches {
            Ok(switches) if switches.len() == 4 => self.send_frame(MessageType::Manual, &switches),
            _ => vec!["ERR syntax expected four switch states".to_string()],
        }
    }

    fn handle_config(&mut self, args: &[&str]) -> Vec<String> {
        let [name, value] = args else {
            return vec!["ERR syntax expected `config <param> <value>`".to_string()];
        };
        let param = [ConfigParam::ArmDelay, ConfigParam::TickPeriodMicros]
            .into_iter()
            .find(|param| param.to_string().eq_ignore_ascii_case(name));
        let Some(param) = param else {
            return vec![format!("ERR syntax unknown parameter `{name}`")];
        };
        let Ok(value) = value.parse::<u16>() else {
            return vec![format!("ERR syntax bad value `{value}`")];
        };

        let [lo, hi] = value.to_le_bytes();
        self.send_frame(MessageType::Config, &[param.as_byte(), lo, hi])
    }

    fn handle_corrupt(&mut self, args: &[&str]) -> Vec<String> {
        let table = match parse_targets(args) {
            Ok(table) => table,
            Err(message) => return vec![message],
        };
        let mut frame = match build_frame(MessageType::PwmTable, &table) {
            Ok(frame) => frame,
            Err(error) => return vec![describe_encode_error(error)],
        };
        let checksum = frame.len() - 2;
        frame[checksum] ^= 0xFF;
        self.transmit(frame)
    }

    fn handle_send(&mut self, args: &[&str]) -> Vec<String> {
        let bytes: Result<Vec<u8>, _> = args
            .iter()
            .map(|raw| u8::from_str_radix(raw.trim_start_matches("0x"), 16))
            .collect();
        match bytes {
            Ok(bytes) if !bytes.is_empty() => self.transmit(bytes),
            _ => vec!["ERR syntax expected hex bytes".to_string()],
        }
    }

    fn handle_cancel(&mut self, args: &[&str]) -> Vec<String> {
        match args.first().map(|raw| raw.parse::<usize>()) {
            Some(Ok(tick)) => {
                self.device.cancel_at(tick);
                vec![format!("OK next shot drops the link before tick {tick}")]
            }
            _ => vec!["ERR syntax expected `cancel <tick>`".to_string()],
        }
    }

    fn handle_emit(&mut self, args: &[&str]) -> Vec<String> {
        let Some(path) = args.first() else {
            return vec!["ERR syntax expected `emit <path>`".to_string()];
        };
        let Some(frame) = self.last_frame.as_ref() else {
            return vec!["ERR no frame sent yet".to_string()];
        };
        match fs::write(path, frame) {
            Ok(()) => vec![format!("OK wrote {} bytes to {path}", frame.len())],
            Err(err) => vec![format!("ERR write {path}: {err}")],
        }
    }

    fn send_frame(&mut self, kind: MessageType, payload: &[u8]) -> Vec<String> {
        match build_frame(kind, payload) {
            Ok(frame) => self.transmit(frame),
            Err(error) => vec![describe_encode_error(error)],
        }
    }

    fn transmit(&mut self, bytes: Vec<u8>) -> Vec<String> {
        let mut lines = vec![format!("tx {} bytes: {}", bytes.len(), hex_line(&bytes))];
        for event in self.device.feed(&bytes) {
            render_event(&event, &mut lines);
        }
        self.last_frame = Some(bytes);
        lines
    }

    fn status_lines(&self) -> Vec<String> {
        let counters = self.device.counters();
        let config = self.device.config();
        let mut lines = vec![
            format!("state={}", self.device.state()),
            format!(
                "frames accepted={} bad-type={} checksum={} missing-end={} overflow-bytes={} noise={}",
                counters.frames_accepted,
                counters.bad_type,
                counters.checksum_mismatch,
                counters.missing_end,
                counters.overflow_bytes,
                counters.noise_bytes
            ),
            format!(
                "config arm-delay={} tick={}us periods/tick={}",
                config.arm_delay,
                config.tick_period.as_micros(),
                self.device.periods_per_tick()
            ),
            format!("buffer capacity={PULSE_CAPACITY} max-frame-payload={MAX_PAYLOAD_LEN}"),
        ];
        let stage = self.device.stage();
        let parked = stage
            .forced
            .last()
            .map_or_else(|| "-".to_string(), |word| format!("0x{word:08x}"));
        lines.push(format!(
            "pio enabled={} pwm running={} last forced word={parked}",
            stage.enabled, stage.running
        ));
        if let Some(report) = self.device.last_report() {
            lines.push(format!(
                "last shot {} ticks={} cycles={} overruns={}",
                report.outcome, report.ticks, report.cycles, report.overruns
            ));
        }
        lines
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

fn parse_targets(raw: &[&str]) -> Result<Vec<u8>, String> {
    if raw.is_empty() {
        return Err("ERR syntax expected at least one target".to_string());
    }
    raw.iter()
        .map(|value| {
            value
                .parse::<u8>()
                .map_err(|_| format!("ERR syntax bad target `{value}`"))
        })
        .collect()
}

fn describe_encode_error(error: EncodeError) -> String {
    match error {
        EncodeError::PayloadTooLong { len } => format!(
            "ERR table has {len} entries; the LENGTH byte holds at most {MAX_PAYLOAD_LEN}"
        ),
        EncodeError::BufferTooSmall { needed } => format!("ERR frame needs {needed} bytes"),
    }
}

fn render_event(event: &DeviceEvent, lines: &mut Vec<String>) {
    match event {
        DeviceEvent::FrameAccepted {
            kind,
            length,
            stored,
        } => lines.push(format!("rx {kind} frame len={length} stored={stored}")),
        DeviceEvent::FrameRejected(error) => lines.push(format!("rx frame dropped: {error}")),
        DeviceEvent::PayloadRejected { kind, error } => {
            lines.push(format!("ERR {kind} payload refused: {error}"));
        }
        DeviceEvent::ShotFired(trace) => render_shot(trace, lines),
        DeviceEvent::ShotRefused(error) => lines.push(format!("ERR shot refused: {error}")),
        DeviceEvent::Holding { pattern, word } => {
            lines.push(format!("OK holding {pattern} word=0x{word:08x}"));
        }
        DeviceEvent::Configured(command) => {
            lines.push(format!("OK {}={}", command.param, command.value));
        }
    }
}

fn render_shot(trace: &ShotTrace, lines: &mut Vec<String>) {
    lines.push(format!(
        "armed word=0x{:08x} free-wheel periods={} planned ticks={}",
        trace.arm_word, trace.arm_periods, trace.planned_ticks
    ));
    for tick in &trace.ticks {
        let word = tick
            .last_word
            .map_or_else(|| "-".to_string(), |word| format!("0x{word:08x}"));
        lines.push(format!(
            "  tick {:>3} target={:>3} words={} word={word}",
            tick.tick, tick.target, tick.words
        ));
    }
    let parked = trace
        .parked_word
        .map_or_else(|| "-".to_string(), |word| format!("0x{word:08x}"));
    lines.push(format!(
        "OK shot {} ticks={} cycles={} overruns={} parked={parked}",
        trace.report.outcome, trace.report.ticks, trace.report.cycles, trace.report.overruns
    ));
}

fn hex_line(bytes: &[u8]) -> String {
    const SHOWN: usize = 16;
    let mut line = bytes
        .iter()
        .take(SHOWN)
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    if bytes.len() > SHOWN {
        line.push_str(&format!(" .. (+{})", bytes.len() - SHOWN));
    }
    line
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

struct TranscriptLogger {
    writer: Box<dyn Write>,
}

impl TranscriptLogger {
    fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: Box::new(BufWriter::new(file)),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    #[cfg(test)]
    fn discard() -> Self {
        Self {
            writer: Box::new(io::sink()),
        }
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
