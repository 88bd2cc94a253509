use plasma_core::protocol::{
    FrameEvent, FrameParser, FrameState, MAX_PAYLOAD_LEN, Message, MessageType, PULSE_CAPACITY,
    checksum, encode_frame,
};
use plasma_core::status::{SystemState, SystemStateCell};

fn frame(kind: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; payload.len() + 5];
    let len = encode_frame(kind, payload, &mut out).expect("payload fits");
    out.truncate(len);
    out
}

/// Feeds `bytes` and mirrors every state change into `cell`.
fn drive<const N: usize>(
    parser: &mut FrameParser<N>,
    cell: &SystemStateCell,
    bytes: &[u8],
) -> Vec<SystemState> {
    let mut seen = Vec::new();
    for &byte in bytes {
        if let Some(state) = parser.push(byte).system_state() {
            cell.set(state);
            seen.push(state);
        }
    }
    seen
}

#[test]
fn two_entry_table_reaches_data_ready() {
    let xor = 0xAA ^ 0x01 ^ 0x02 ^ 0x05 ^ 0x0A;
    let bytes = [0xAA, 0x01, 0x02, 0x05, 0x0A, xor, 0x55];
    assert_eq!(bytes.to_vec(), frame(MessageType::PwmTable, &[0x05, 0x0A]));

    let mut parser = FrameParser::<PULSE_CAPACITY>::new();
    let cell = SystemStateCell::new();
    cell.set(SystemState::Idle);

    let mut states = Vec::new();
    for &byte in &bytes {
        parser.push(byte);
        states.push(parser.state());
    }
    assert_eq!(
        states,
        [
            FrameState::WaitType { checksum: 0xAA },
            FrameState::WaitLength {
                kind: MessageType::PwmTable,
                checksum: 0xAB
            },
            FrameState::WaitData {
                kind: MessageType::PwmTable,
                expected: 2,
                index: 0,
                checksum: 0xA9
            },
            FrameState::WaitData {
                kind: MessageType::PwmTable,
                expected: 2,
                index: 1,
                checksum: 0xAC
            },
            FrameState::WaitChecksum {
                kind: MessageType::PwmTable,
                expected: 2,
                checksum: xor
            },
            FrameState::WaitEnd {
                kind: MessageType::PwmTable,
                expected: 2
            },
            FrameState::WaitStart,
        ]
    );

    assert_eq!(parser.received_count(), 2);
    let received = parser.frame().expect("frame completed");
    assert_eq!(received.payload, &[0x05, 0x0A]);
    assert_eq!(received.message(), Ok(Message::PwmTable(&[0x05, 0x0A])));

    let mut replay = FrameParser::<PULSE_CAPACITY>::new();
    assert_eq!(
        drive(&mut replay, &cell, &bytes),
        [SystemState::Receiving, SystemState::DataReady]
    );
    assert_eq!(cell.get(), SystemState::DataReady);
}

#[test]
fn well_formed_frames_round_trip() {
    let mut parser = FrameParser::<PULSE_CAPACITY>::new();
    let payloads: [&[u8]; 4] = [&[], &[0], &[199; 17], &[0x55, 0xAA, 0x55, 0xAA]];

    for payload in payloads {
        for kind in [MessageType::PwmTable, MessageType::Config] {
            let bytes = frame(kind, payload);
            let completed = bytes
                .iter()
                .filter_map(|&byte| match parser.push(byte) {
                    FrameEvent::Completed { kind, length } => Some((kind, length)),
                    _ => None,
                })
                .collect::<Vec<_>>();
            assert_eq!(completed, [(kind, payload.len())]);
            assert_eq!(parser.frame().expect("frame").payload, payload);
        }
    }
}

#[test]
fn corrupted_checksum_then_good_frame_parses_once() {
    let mut corrupted = frame(MessageType::PwmTable, &[10, 20, 30]);
    let checksum_at = corrupted.len() - 2;
    corrupted[checksum_at] ^= 0x01;
    let good = frame(MessageType::PwmTable, &[40, 50]);

    let mut parser = FrameParser::<PULSE_CAPACITY>::new();
    let cell = SystemStateCell::new();
    let mut completed = Vec::new();
    let mut stream = corrupted.clone();
    stream.extend_from_slice(&good);

    for byte in stream {
        let event = parser.push(byte);
        if let Some(state) = event.system_state() {
            cell.set(state);
        }
        if let FrameEvent::Completed { length, .. } = event {
            completed.push(parser.frame().expect("frame").payload.to_vec());
            assert_eq!(length, 2);
        }
    }

    assert_eq!(completed, [vec![40, 50]]);
    assert_eq!(parser.counters().checksum_mismatch, 1);
    assert_eq!(parser.counters().frames_accepted, 1);
    assert_eq!(cell.get(), SystemState::DataReady);
}

#[test]
fn rejected_frame_returns_to_idle() {
    let mut bytes = frame(MessageType::Manual, &[0, 1, 0, 1]);
    let last = bytes.len() - 1;
    bytes[last] = 0x00;

    let mut parser = FrameParser::<PULSE_CAPACITY>::new();
    let cell = SystemStateCell::new();
    assert_eq!(
        drive(&mut parser, &cell, &bytes),
        [SystemState::Receiving, SystemState::Idle]
    );
    assert!(parser.frame().is_none());
}

#[test]
fn largest_encodable_frame_fits_the_buffer() {
    let payload: Vec<u8> = (0..MAX_PAYLOAD_LEN)
        .map(|i| u8::try_from(i % 200).unwrap())
        .collect();
    let bytes = frame(MessageType::PwmTable, &payload);
    assert_eq!(bytes[bytes.len() - 2], checksum(MessageType::PwmTable, &payload));

    let mut parser = FrameParser::<PULSE_CAPACITY>::new();
    let received = bytes
        .iter()
        .fold(None, |found, &byte| match parser.push(byte) {
            FrameEvent::Completed { length, .. } => Some(length),
            _ => found,
        });
    assert_eq!(received, Some(MAX_PAYLOAD_LEN));
    assert_eq!(parser.frame().expect("frame").payload, payload.as_slice());
    assert_eq!(parser.counters().overflow_bytes, 0);
}

#[test]
fn declared_length_beyond_capacity_never_writes_past_buffer() {
    let payload = [7u8; 64];
    let bytes = frame(MessageType::PwmTable, &payload);

    let mut parser = FrameParser::<16>::new();
    for &byte in &bytes {
        if let FrameEvent::Store { index, .. } = parser.push(byte) {
            assert!(index < parser.capacity());
        }
    }

    assert_eq!(parser.received_count(), 16);
    assert_eq!(parser.frame().expect("frame").payload, &payload[..16]);
    assert_eq!(parser.counters().overflow_bytes, 48);
}

#[test]
fn length_equal_to_capacity_fills_the_buffer_exactly() {
    let payload: Vec<u8> = (100..116).collect();
    let bytes = frame(MessageType::PwmTable, &payload);

    let mut parser = FrameParser::<16>::new();
    let completed = bytes
        .iter()
        .filter(|&&byte| matches!(parser.push(byte), FrameEvent::Completed { length: 16, .. }))
        .count();

    assert_eq!(completed, 1);
    assert_eq!(parser.received_count(), 16);
    assert_eq!(parser.frame().expect("frame").payload, payload.as_slice());
    assert_eq!(parser.counters().overflow_bytes, 0);
}

#[test]
fn rejected_frames_leave_the_accepted_table_intact() {
    let mut parser = FrameParser::<64>::new();
    for byte in frame(MessageType::PwmTable, &[10, 20, 30]) {
        parser.push(byte);
    }

    let mut bad_checksum = frame(MessageType::PwmTable, &[199, 199, 199]);
    let at = bad_checksum.len() - 2;
    bad_checksum[at] ^= 0xFF;
    let mut bad_end = frame(MessageType::PwmTable, &[150, 150, 150, 150]);
    let at = bad_end.len() - 1;
    bad_end[at] = 0x00;

    for byte in bad_checksum.into_iter().chain(bad_end) {
        parser.push(byte);
    }

    assert_eq!(parser.counters().checksum_mismatch, 1);
    assert_eq!(parser.counters().missing_end, 1);
    assert_eq!(parser.received_count(), 3);
    let kept = parser.frame().expect("earlier frame");
    assert_eq!(kept.kind, MessageType::PwmTable);
    assert_eq!(kept.payload, &[10, 20, 30]);

    for byte in frame(MessageType::PwmTable, &[1, 2]) {
        parser.push(byte);
    }
    assert_eq!(parser.frame().expect("new frame").payload, &[1, 2]);
}

#[test]
fn noise_between_frames_is_skipped() {
    let mut stream = vec![0x00, 0x13, 0x55, 0xFF];
    stream.extend(frame(MessageType::Config, &[0x02, 0xE8, 0x03]));
    stream.extend([0x42, 0x42]);

    let mut parser = FrameParser::<PULSE_CAPACITY>::new();
    let mut messages = Vec::new();
    for byte in stream {
        if let Some(frame) = parser.feed(byte) {
            messages.push(format!("{:?}", frame.message()));
        }
    }

    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("TickPeriodMicros"));
    assert_eq!(parser.counters().noise_bytes, 6);
}
