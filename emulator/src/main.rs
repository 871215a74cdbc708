mod console;
mod node;
mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, IsTerminal, Write};
use std::process;

use node::NodeOptions;
use session::{Session, TranscriptProfile, parse_time_option};

const USAGE: &str = "Usage: sensor-emulator [--profile <boot|night|drain|drift>] \
[--battery <pct>] [--drain <pct/h>] [--start <time>] [--rtc <time>] [--drift <ppm>] \
[--cycles <n>]";

#[derive(Debug, Default)]
struct Invocation {
    options: NodeOptions,
    profile: Option<TranscriptProfile>,
    /// Run this many cycles and exit instead of opening the console.
    cycles: Option<u32>,
}

fn main() -> io::Result<()> {
    let invocation = parse_args(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdout = io::stdout();
    let colored = stdout.is_terminal();
    let mut writer = stdout.lock();
    let mut session = Session::new(&invocation.options, invocation.profile)?;
    session.set_colored(colored);

    for line in session.take_pending()? {
        writeln!(writer, "{line}")?;
    }

    if let Some(cycles) = invocation.cycles {
        for line in session.handle_command(&format!("cycle {cycles}"))? {
            writeln!(writer, "{line}")?;
        }
        for line in session.handle_command("stats")? {
            writeln!(writer, "{line}")?;
        }
        return Ok(());
    }

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "Sensor node emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed after {} commands.", session.command_count())?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Invocation, String> {
    let mut invocation = Invocation::default();
    // Profile defaults first so explicit flags win regardless of order.
    let mut overrides = Vec::new();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };
        match flag.as_str() {
            "--profile" => {
                let profile = TranscriptProfile::from_tag(&value()?)?;
                invocation.options = profile.options();
                invocation.profile = Some(profile);
            }
            "--cycles" => invocation.cycles = Some(parse_number(&flag, &value()?)?),
            "--battery" | "--drain" | "--start" | "--rtc" | "--drift" => {
                overrides.push((flag.clone(), value()?));
            }
            other => return Err(format!("Unknown option `{other}`")),
        }
    }

    for (flag, value) in overrides {
        let options = &mut invocation.options;
        match flag.as_str() {
            "--battery" => options.battery_percent = parse_number(&flag, &value)?,
            "--drain" => options.drain_per_hour = parse_number(&flag, &value)?,
            "--start" => options.start = parse_time_option(&value)?,
            "--rtc" if value.eq_ignore_ascii_case("unset") => options.rtc_time = None,
            "--rtc" => options.rtc_time = Some(parse_time_option(&value)?),
            _ => options.drift_ppm = parse_number(&flag, &value)?,
        }
    }
    Ok(invocation)
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid value `{value}` for {flag}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_core::clock::DateTime;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(ToString::to_string).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn flags_override_profile_defaults() {
        let invocation = parse_args(args(&[
            "--battery=42",
            "--profile",
            "drain",
            "--start",
            "2025-01-02T03:04:05Z",
            "--cycles",
            "12",
        ]))
        .expect("valid flags");
        assert_eq!(invocation.profile, Some(TranscriptProfile::Drain));
        assert!((invocation.options.battery_percent - 42.0).abs() < f64::EPSILON);
        assert!((invocation.options.drain_per_hour - 2.0).abs() < f64::EPSILON);
        assert_eq!(invocation.options.start, DateTime::new(2025, 1, 2, 3, 4, 5));
        assert_eq!(invocation.cycles, Some(12));
    }

    #[test]
    fn bad_flags_are_reported() {
        assert!(parse_args(args(&["--battery"])).is_err());
        assert!(parse_args(args(&["--rtc", "yesterday"])).is_err());
        assert!(parse_args(args(&["--verbose"])).is_err());
        let fresh = parse_args(args(&["--rtc", "unset"])).expect("unset chip");
        assert_eq!(fresh.options.rtc_time, None);
    }
}
