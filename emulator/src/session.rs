use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sensor_core::Fault;
use sensor_core::clock::{DateTime, parse_network_time};
use sensor_core::cycle::{CycleOutcome, CycleReport};
use sensor_core::power::ResetReason;
use sensor_core::schedule::SleepSchedule;
use sensor_core::sequences::{RAIL_COUNT, Rail};
use sensor_core::telemetry::Severity;

use crate::node::{Node, NodeOptions};

/// Upper bound for one `cycle <n>` request.
const MAX_CYCLES_PER_COMMAND: u32 = 2_000;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "cycle",
        "cycle [count]                    - run wake cycles (deep sleep resets the node)",
    ),
    (
        "battery",
        "battery [<pct>|drain <pct/h>|temp <c>|fail on|off] - inspect or steer the fuel gauge",
    ),
    (
        "rtc",
        "rtc [drift <ppm>|fail on|off]    - inspect or steer the DS1307",
    ),
    (
        "sync",
        "sync <time>                      - apply a network time (ISO or modem format)",
    ),
    (
        "schedule",
        "schedule [<start> <end> [night_s day_s]|off|on] - show or replace the night window",
    ),
    (
        "nap",
        "nap <secs>                       - light sleep with the wake button armed",
    ),
    (
        "button",
        "button <secs>                    - press the wake button after a delay",
    ),
    (
        "upload",
        "upload every <n>|unsynced on|off - upload cadence",
    ),
    (
        "modem",
        "modem on|off                     - let uploads reach the network or not",
    ),
    (
        "stats",
        "stats                            - power and time-sync statistics",
    ),
    (
        "status",
        "status                           - rails, clocks, battery and flags",
    ),
    (
        "health",
        "health                           - run both health checks",
    ),
    (
        "shutdown",
        "shutdown [emergency]             - power down until `reset`",
    ),
    ("reset", "reset                            - press the reset button"),
    (
        "log",
        "log debug|info|warn|error        - console telemetry threshold",
    ),
    ("help", "help [topic]                     - show help for a command"),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    /// Factory-fresh clock synced by the first upload.
    Boot,
    /// A day and a night of cycles on the default schedule.
    Night,
    /// Battery drained through low charge into the emergency path.
    Drain,
    /// Drifting crystal corrected by successive syncs.
    Drift,
}

impl TranscriptProfile {
    pub const ALL: [Self; 4] = [Self::Boot, Self::Night, Self::Drain, Self::Drift];

    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Boot => "transcripts/emulator-boot.log",
            TranscriptProfile::Night => "transcripts/emulator-night.log",
            TranscriptProfile::Drain => "transcripts/emulator-drain.log",
            TranscriptProfile::Drift => "transcripts/emulator-drift.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Boot => "Sensor node emulator cold boot transcript",
            TranscriptProfile::Night => "Sensor node emulator day/night schedule transcript",
            TranscriptProfile::Drain => "Sensor node emulator battery drain transcript",
            TranscriptProfile::Drift => "Sensor node emulator clock drift transcript",
        }
    }

    pub fn options(self) -> NodeOptions {
        match self {
            TranscriptProfile::Boot => NodeOptions::DEFAULT,
            TranscriptProfile::Night => NodeOptions {
                start: DateTime::new(2025, 6, 1, 20, 0, 0),
                rtc_time: Some(DateTime::new(2025, 6, 1, 20, 0, 0)),
                ..NodeOptions::DEFAULT
            },
            TranscriptProfile::Drain => NodeOptions {
                battery_percent: 18.0,
                drain_per_hour: 2.0,
                rtc_time: Some(NodeOptions::DEFAULT.start),
                ..NodeOptions::DEFAULT
            },
            TranscriptProfile::Drift => NodeOptions {
                rtc_time: Some(NodeOptions::DEFAULT.start),
                drift_ppm: 2_000,
                ..NodeOptions::DEFAULT
            },
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.tag().eq_ignore_ascii_case(tag))
            .ok_or_else(|| format!("Unknown transcript profile `{tag}`"))
    }

    pub fn tag(self) -> &'static str {
        match self {
            TranscriptProfile::Boot => "boot",
            TranscriptProfile::Night => "night",
            TranscriptProfile::Drain => "drain",
            TranscriptProfile::Drift => "drift",
        }
    }
}

pub struct Session {
    node: Node,
    transcript: Option<TranscriptLogger>,
    colored: bool,
    command_count: usize,
    boot_notes: Vec<String>,
}

impl Session {
    /// Powers the node on. With a profile, everything is also written to the
    /// profile's transcript file.
    pub fn new(options: &NodeOptions, profile: Option<TranscriptProfile>) -> io::Result<Self> {
        let transcript = profile.map(TranscriptLogger::new).transpose()?;
        let (node, faults) = Node::power_on(options);
        Ok(Self {
            node,
            transcript,
            colored: false,
            command_count: 0,
            boot_notes: describe_boot_faults(&faults),
        })
    }

    /// Colours telemetry levels in returned lines; transcripts stay plain.
    pub fn set_colored(&mut self, colored: bool) {
        self.colored = colored;
    }

    /// Boot output produced before the first command.
    pub fn take_pending(&mut self) -> io::Result<Vec<String>> {
        let notes = std::mem::take(&mut self.boot_notes);
        self.emit_telemetry_and(&notes)
    }

    pub fn command_count(&self) -> usize {
        self.command_count
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        self.command_count += 1;

        let elapsed = self.node.clock().elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let mut words = trimmed.split_whitespace();
        let command = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();
        let result = match command.as_str() {
            "help" => Ok(handle_help(args.first().copied())),
            "cycle" => self.handle_cycle(&args),
            "battery" => self.handle_battery(&args),
            "rtc" => self.handle_rtc(&args),
            "sync" => self.handle_sync(trimmed["sync".len()..].trim()),
            "schedule" => self.handle_schedule(&args),
            "nap" => self.handle_nap(&args),
            "button" => self.handle_button(&args),
            "upload" => self.handle_upload(&args),
            "modem" => self.handle_modem(&args),
            "stats" => Ok(self.describe_stats()),
            "status" => Ok(self.describe_status()),
            "health" => Ok(self.handle_health()),
            "shutdown" => self.handle_shutdown(&args),
            "reset" => Ok(self.handle_reset()),
            "log" => self.handle_log(&args),
            other => Err(format!("unknown command `{other}`; try `help`")),
        };

        let lines = match result {
            Ok(lines) => lines,
            Err(message) => vec![format!("ERR {message}")],
        };
        self.emit_telemetry_and(&lines)
    }

    /// Telemetry raised while handling a command comes first, then the
    /// command's own reply.
    fn emit_telemetry_and(&mut self, reply: &[String]) -> io::Result<Vec<String>> {
        let telemetry = self.node.telemetry().take_lines();
        let mut lines = Vec::with_capacity(telemetry.len() + reply.len());
        let mut plain = Vec::with_capacity(lines.capacity());
        for line in &telemetry {
            plain.push(line.plain());
            lines.push(if self.colored {
                line.colored()
            } else {
                line.plain()
            });
        }
        plain.extend(reply.iter().cloned());
        lines.extend(reply.iter().cloned());

        if let Some(transcript) = self.transcript.as_mut() {
            let elapsed = self.node.clock().elapsed();
            for line in &plain {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(lines)
    }

    fn ensure_running(&self) -> Result<(), String> {
        if self.node.is_parked() {
            Err("node is shut down; `reset` to power it back on".to_string())
        } else {
            Ok(())
        }
    }

    fn handle_cycle(&mut self, args: &[&str]) -> Result<Vec<String>, String> {
        self.ensure_running()?;
        let count: u32 = optional_arg(args.first(), 1, "cycle count")?;
        if count == 0 || count > MAX_CYCLES_PER_COMMAND {
            return Err(format!(
                "cycle count must be between 1 and {MAX_CYCLES_PER_COMMAND}"
            ));
        }

        let mut lines = Vec::new();
        for _ in 0..count {
            let (report, faults) = self.node.run_cycle();
            lines.push(describe_report(&report));
            lines.extend(describe_boot_faults(&faults));
            if self.node.is_parked() {
                break;
            }
        }
        Ok(lines)
    }

    fn handle_battery(&mut self, args: &[&str]) -> Result<Vec<String>, String> {
        let gauge = self.node.gauge();
        match args {
            [] => {}
            ["drain", rate] => gauge.set_drain(parse_arg(rate, "drain rate")?),
            ["temp", celsius] => gauge.set_temperature(parse_arg(celsius, "temperature")?),
            ["fail", state] => gauge.set_failing(parse_switch(state)?),
            [percent] => gauge.set_charge(parse_arg(percent, "charge")?),
            _ => return Err("usage: battery [<pct>|drain <pct/h>|temp <c>|fail on|off]".into()),
        }

        let line = match self.node.battery().read_status() {
            Ok(status) => format!(
                "battery {}% {}mV {}mA soh={}% cell={}C board={}C tte={}min",
                status.state_of_charge,
                status.voltage_mv,
                status.current_ma,
                status.state_of_health,
                status.cell_temperature_c,
                status.board_temperature_c,
                status.time_to_empty_min
            ),
            Err(fault) => format!("battery unreadable: {fault}"),
        };
        Ok(vec![line])
    }

    fn handle_rtc(&mut self, args: &[&str]) -> Result<Vec<String>, String> {
        let chip = self.node.chip();
        match args {
            [] => {}
            ["drift", ppm] => chip.set_drift_ppm(parse_arg(ppm, "drift")?),
            ["fail", state] => chip.set_failing(parse_switch(state)?),
            _ => return Err("usage: rtc [drift <ppm>|fail on|off]".into()),
        }

        let service_time = match self.node.rtc().current_timestamp() {
            Ok(text) => text.to_string(),
            Err(fault) => format!("unavailable ({fault})"),
        };
        Ok(vec![
            format!(
                "rtc chip={} {} drift={}ppm",
                chip.time(),
                if chip.is_running() {
                    "running"
                } else {
                    "halted"
                },
                chip.drift_ppm()
            ),
            format!(
                "rtc service={service_time} validity={:?} network={}",
                self.node.rtc().validity(),
                self.node.work().true_time()
            ),
        ])
    }

    fn handle_sync(&mut self, text: &str) -> Result<Vec<String>, String> {
        if text.is_empty() {
            return Err("usage: sync <time>".into());
        }
        match self.node.rtc().set_time_from_network(text) {
            Ok(outcome) => {
                let drift = outcome
                    .drift_seconds
                    .map_or_else(|| "n/a".to_string(), |seconds| format!("{seconds}s"));
                Ok(vec![format!(
                    "OK synced to {} drift={drift} persisted={}",
                    outcome.time.local, outcome.persisted
                )])
            }
            Err(fault) => Err(format!("sync rejected: {fault}")),
        }
    }

    fn handle_schedule(&mut self, args: &[&str]) -> Result<Vec<String>, String> {
        let rtc = self.node.rtc();
        let current = rtc.sleep_schedule();
        match args {
            [] => {}
            ["off"] => rtc.set_sleep_schedule(current.disabled()),
            ["on"] => rtc.set_sleep_schedule({
                let mut enabled = current;
                enabled.enabled = true;
                enabled
            }),
            [start, end] => rtc.set_sleep_schedule(build_schedule(
                start,
                end,
                current.night_sleep,
                current.day_sleep,
            )?),
            [start, end, night, day] => rtc.set_sleep_schedule(build_schedule(
                start,
                end,
                Duration::from_secs(parse_arg(night, "night sleep")?),
                Duration::from_secs(parse_arg(day, "day sleep")?),
            )?),
            _ => return Err("usage: schedule [<start> <end> [night_s day_s]|off|on]".into()),
        }

        let schedule = rtc.sleep_schedule();
        Ok(vec![format!(
            "schedule night={:02}:00-{:02}:00 enabled={} night_sleep={}s day_sleep={}s next={}s",
            schedule.night_start_hour(),
            schedule.night_end_hour(),
            schedule.enabled,
            schedule.night_sleep.as_secs(),
            schedule.day_sleep.as_secs(),
            rtc.scheduled_sleep_duration().as_secs()
        )])
    }

    fn handle_nap(&mut self, args: &[&str]) -> Result<Vec<String>, String> {
        self.ensure_running()?;
        let [seconds] = args else {
            return Err("usage: nap <secs>".into());
        };
        let duration = Duration::from_secs(parse_arg(seconds, "nap length")?);
        let before = self.node.clock().elapsed();
        let completed = self
            .node
            .nap(duration)
            .map_err(|fault| format!("nap refused: {fault}"))?;
        let slept = self.node.clock().elapsed().saturating_sub(before);
        Ok(vec![format!(
            "nap {} after {}",
            if completed { "completed" } else { "interrupted" },
            format_duration_short(slept)
        )])
    }

    fn handle_button(&mut self, args: &[&str]) -> Result<Vec<String>, String> {
        let after = match args {
            [] => 0,
            [seconds] => parse_arg(seconds, "delay")?,
            _ => return Err("usage: button <secs>".into()),
        };
        self.node
            .power_mut()
            .hal_mut()
            .press_button_in(Duration::from_secs(after));
        Ok(vec![format!("button press scheduled in {after}s")])
    }

    fn handle_upload(&mut self, args: &[&str]) -> Result<Vec<String>, String> {
        let cycle = self.node.cycle_mut();
        let mut config = cycle.config();
        match args {
            [] => {}
            ["every", count] => config.upload_every = parse_arg(count, "upload interval")?,
            ["unsynced", state] => config.upload_when_unsynced = parse_switch(state)?,
            _ => return Err("usage: upload every <n>|unsynced on|off".into()),
        }
        cycle.set_config(config);
        Ok(vec![format!(
            "upload every={} unsynced={}",
            config.upload_every, config.upload_when_unsynced
        )])
    }

    fn handle_modem(&mut self, args: &[&str]) -> Result<Vec<String>, String> {
        let [state] = args else {
            return Err("usage: modem on|off".into());
        };
        let online = parse_switch(state)?;
        self.node.work_mut().modem_online = online;
        Ok(vec![format!(
            "modem {}",
            if online { "online" } else { "offline" }
        )])
    }

    fn describe_stats(&self) -> Vec<String> {
        let power = self.node.power().power_stats();
        let sync = self.node.rtc().sync_status();
        let work = self.node.work();
        vec![
            format!(
                "power active={} sleep={} duty={:.2}% cycles={} wakes={} avg_sleep={:.1}s",
                format_duration_short(power.total_active),
                format_duration_short(power.total_sleep),
                power.duty_cycle_percent,
                power.sleep_cycles,
                power.wakeup_events,
                power.average_sleep_seconds
            ),
            format!(
                "power reset={} last_wake={}",
                power.last_reset_reason.label(),
                power.last_wakeup_cause.label()
            ),
            format!(
                "rtc attempts={} ok={} failed={} drift_total={}s drift_avg={:.1}s last_sync={}",
                sync.sync_attempts,
                sync.successful_syncs,
                sync.failed_syncs,
                sync.total_drift_seconds,
                sync.average_drift_seconds(),
                sync.last_sync
                    .map_or_else(|| "never".to_string(), |time| time.to_string())
            ),
            format!(
                "scan scans={} stored={} uploaded={}",
                work.scans(),
                work.stored(),
                work.uploaded()
            ),
        ]
    }

    fn describe_status(&self) -> Vec<String> {
        let power = self.node.power();
        let hal = power.hal();
        let rails = hal.rails();
        let mut rail_states = Vec::with_capacity(RAIL_COUNT);
        for (index, on) in rails.iter().enumerate() {
            if let Some(rail) = Rail::from_index(index) {
                rail_states.push(format!("{}={}", rail.name(), if *on { "on" } else { "off" }));
            }
        }
        let watchdog = hal
            .watchdog_timeout()
            .map_or_else(|| "disarmed".to_string(), |t| format!("{}s", t.as_secs()));

        vec![
            format!("rails {}", rail_states.join(" ")),
            format!(
                "flags emergency={} reason={} radios_shed={} parked={} watchdog={watchdog}",
                power.is_emergency_mode(),
                power.emergency_reason().unwrap_or("-"),
                power.radios_shed(),
                self.node.is_parked()
            ),
            format!(
                "clock uptime={} network={} chip={}",
                format_duration_short(self.node.clock().elapsed()),
                self.node.work().true_time(),
                self.node.chip().time()
            ),
            format!(
                "battery gauge={:.1}% last_cycle={}",
                self.node.gauge().charge(),
                self.node
                    .last_report()
                    .map_or_else(|| "none".to_string(), |report| report.cycle.to_string())
            ),
        ]
    }

    fn handle_health(&mut self) -> Vec<String> {
        let power = self.node.power_mut().perform_health_check();
        let rtc = self.node.rtc().perform_health_check();
        vec![format!("health power={power} rtc={rtc}")]
    }

    fn handle_shutdown(&mut self, args: &[&str]) -> Result<Vec<String>, String> {
        self.ensure_running()?;
        let emergency = match args {
            [] => false,
            ["emergency"] => true,
            _ => return Err("usage: shutdown [emergency]".into()),
        };
        let mut lines = Vec::new();
        if let Err(fault) = self.node.shutdown(emergency) {
            lines.push(format!("sync record not persisted: {fault}"));
        }
        lines.push("node powered down; `reset` to restart".to_string());
        Ok(lines)
    }

    fn handle_reset(&mut self) -> Vec<String> {
        let faults = self.node.restart(ResetReason::External);
        let mut lines = vec!["reset".to_string()];
        lines.extend(describe_boot_faults(&faults));
        lines
    }

    fn handle_log(&mut self, args: &[&str]) -> Result<Vec<String>, String> {
        let severity = match args {
            [] => self.node.telemetry().min_severity(),
            [level] => match level.to_ascii_lowercase().as_str() {
                "debug" => Severity::Debug,
                "info" => Severity::Info,
                "warn" => Severity::Warning,
                "error" => Severity::Error,
                other => return Err(format!("unknown level `{other}`")),
            },
            _ => return Err("usage: log debug|info|warn|error".into()),
        };
        self.node.telemetry().set_min_severity(severity);
        Ok(vec![format!("log level {}", severity.label())])
    }
}

fn handle_help(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) if !target.is_empty() => {
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
        _ => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
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
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since power-on"
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
            "[+{:>9} ms] {} {}",
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

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_arg<T: FromStr>(value: &str, what: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid {what} `{value}`"))
}

fn optional_arg<T: FromStr>(value: Option<&&str>, default: T, what: &str) -> Result<T, String> {
    value.map_or(Ok(default), |value| parse_arg(value, what))
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(format!("expected on|off, got `{value}`")),
    }
}

fn build_schedule(
    start: &str,
    end: &str,
    night: Duration,
    day: Duration,
) -> Result<SleepSchedule, String> {
    SleepSchedule::new(parse_arg(start, "hour")?, parse_arg(end, "hour")?, night, day)
        .map_err(|fault| format!("schedule rejected: {fault}"))
}

/// Parses `--start`/`--rtc` style values through the same parser the node
/// uses for network time.
pub fn parse_time_option(text: &str) -> Result<DateTime, String> {
    parse_network_time(text)
        .map(|parsed| parsed.local)
        .map_err(|fault| format!("invalid time `{text}`: {fault}"))
}

fn describe_boot_faults(faults: &[Fault]) -> Vec<String> {
    faults
        .iter()
        .map(|fault| format!("boot fault: {fault}"))
        .collect()
}

fn describe_report(report: &CycleReport) -> String {
    let battery = report
        .battery_percent
        .map_or_else(|| "unknown".to_string(), |percent| format!("{percent:.0}%"));
    let scan = report.scan.map_or_else(
        || "skipped".to_string(),
        |tally| format!("wifi={} ble={} dropped={}", tally.wifi, tally.ble, tally.dropped),
    );
    let upload = match report.upload {
        None => "-",
        Some(summary) if !summary.delivered => "failed",
        Some(summary) if summary.time_applied => "delivered+time",
        Some(_) => "delivered",
    };
    let hour = report
        .hour
        .map_or_else(|| "??".to_string(), |hour| format!("{hour:02}"));
    let outcome = match report.outcome {
        CycleOutcome::Slept { woke_by } => format!("slept, woke by {}", woke_by.label()),
        CycleOutcome::Emergency => "emergency sleep".to_string(),
        CycleOutcome::Faulted(fault) => format!("faulted: {fault}"),
    };
    format!(
        "cycle {} wake={} battery={battery} scan[{scan}] upload={upload} hour={hour} sleep={}s -> {outcome}",
        report.cycle,
        report.wake.label(),
        report.planned_sleep.as_secs()
    )
}

fn format_duration_short(duration: Duration) -> String {
    if duration.as_secs() == 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.3}s", duration.as_secs_f64())
    }
}
