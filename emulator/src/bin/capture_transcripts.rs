use std::io;

#[allow(dead_code)]
#[path = "../console.rs"]
mod console;
#[path = "../node.rs"]
#[allow(dead_code)]
mod node;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;
#[allow(dead_code)]
#[path = "../sim.rs"]
mod sim;

use session::{Session, TranscriptProfile};

fn main() -> io::Result<()> {
    for profile in TranscriptProfile::ALL {
        record_profile(profile)?;
        println!("wrote {}", profile.log_path());
    }
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(&profile.options(), Some(profile))?;
    session.take_pending()?;
    let script: &[&str] = match profile {
        TranscriptProfile::Boot => &[
            "status",
            "rtc",
            "cycle",
            "rtc",
            "cycle 5",
            "stats",
            "health",
        ],
        TranscriptProfile::Night => &[
            "schedule",
            "cycle 6",
            "stats",
            "schedule 23 5 900 120",
            "cycle 4",
            "schedule off",
            "cycle",
            "schedule 24 5",
        ],
        TranscriptProfile::Drain => &[
            "battery",
            "cycle 12",
            "status",
            "cycle 30",
            "status",
            "battery 60",
            "battery temp 41",
            "cycle",
            "battery temp 20",
            "battery fail on",
            "cycle",
            "battery fail off",
            "shutdown",
            "cycle",
            "reset",
            "stats",
        ],
        TranscriptProfile::Drift => &[
            "log debug",
            "rtc",
            "cycle 24",
            "rtc",
            "stats",
            "rtc drift -3000",
            "modem off",
            "cycle 12",
            "modem on",
            "cycle 6",
            "sync 2000-01-01T00:00:00",
            "sync 25/06/01,25:00:00+00",
            "stats",
            "button 30",
            "nap 120",
        ],
    };
    for command in script {
        session.handle_command(command)?;
    }
    Ok(())
}
