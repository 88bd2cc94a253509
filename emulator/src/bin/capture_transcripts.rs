use std::io;

#[allow(dead_code)]
#[path = "../device.rs"]
mod device;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, TranscriptProfile};

fn main() -> io::Result<()> {
    record_profile(TranscriptProfile::Ramp)?;
    record_profile(TranscriptProfile::Table)?;
    record_profile(TranscriptProfile::Corrupt)?;
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(profile)?;
    let script: &[&str] = match profile {
        TranscriptProfile::Ramp => &["pulse ramp", "pulse ramp 9", "status"],
        TranscriptProfile::Table => &[
            "pulse table 0 50 99 100 150 199",
            "config tick-period-us 500",
            "pulse table 199 0 199 0",
            "config arm-delay 10",
            "manual 0 1 0 1",
            "manual 1 1 0 0",
            "status",
        ],
        TranscriptProfile::Corrupt => &[
            "corrupt 10 20 30",
            "send 00 13 37",
            "pulse table 10 20 30",
            "cancel 2",
            "pulse table 120 120 120 120 120",
            "status",
        ],
    };

    for line in script {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}
