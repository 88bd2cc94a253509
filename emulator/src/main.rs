mod device;
mod session;

use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process;

use session::{Session, TranscriptProfile};

const USAGE: &str = "Usage: plasma-emulator [--profile <ramp|table|corrupt>] [--script <path>]";

struct Options {
    profile: TranscriptProfile,
    /// Commands to replay instead of reading stdin.
    script: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let mut session = Session::new(options.profile)?;
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    match options.script {
        Some(path) => {
            let reader = BufReader::new(File::open(&path)?);
            run_lines(&mut session, reader, &mut writer, false)
        }
        None => {
            writeln!(
                writer,
                "Plasma pulse emulator ready. Type `help` for commands or `exit` to quit."
            )?;
            let stdin = io::stdin();
            run_lines(&mut session, stdin.lock(), &mut writer, true)
        }
    }
}

/// Feeds each input line to the session until EOF or `exit`.
fn run_lines<R: BufRead, W: Write>(
    session: &mut Session,
    mut reader: R,
    writer: &mut W,
    interactive: bool,
) -> io::Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        if interactive {
            write!(writer, "> ")?;
            writer.flush()?;
        }

        if reader.read_line(&mut line)? == 0 {
            if interactive {
                writeln!(writer)?;
            }
            return Ok(());
        }

        let command = line.trim();
        if command.is_empty() || command.starts_with('#') {
            continue;
        }
        if command.eq_ignore_ascii_case("exit") || command.eq_ignore_ascii_case("quit") {
            writeln!(writer, "Session closed.")?;
            return Ok(());
        }
        if !interactive {
            writeln!(writer, "> {command}")?;
        }

        for response in session.handle_command(command)? {
            writeln!(writer, "{response}")?;
        }
    }
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        profile: TranscriptProfile::Table,
        script: None,
    };

    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--profile=") {
            options.profile = TranscriptProfile::from_tag(value)?;
        } else if arg == "--profile" {
            let value = args.next().ok_or("Expected value after --profile")?;
            options.profile = TranscriptProfile::from_tag(&value)?;
        } else if let Some(value) = arg.strip_prefix("--script=") {
            options.script = Some(PathBuf::from(value));
        } else if arg == "--script" {
            let value = args.next().ok_or("Expected path after --script")?;
            options.script = Some(PathBuf::from(value));
        } else {
            options.profile = TranscriptProfile::from_tag(&arg)?;
        }
    }

    Ok(options)
}
