//! Telemetry vocabulary shared by firmware and host targets.
//!
//! Services in this crate never format log lines themselves. They emit
//! structured [`TelemetryEvent`]s tagged with a [`Component`] and a
//! [`Severity`] into a [`TelemetrySink`]; the firmware forwards them to
//! defmt, the emulator prints them and keeps a transcript. Every event also
//! maps to a compact numeric code so it can ride along with uploaded data.

use core::fmt;
use core::time::Duration;

use heapless::{HistoryBuf, OldestOrdered};

use crate::battery::SafetyViolation;
use crate::error::{Fault, HardwareFault, ValidationFault};
use crate::power::{SleepMode, WakeupCause};
use crate::sequences::Rail;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Monotonic event identifier assigned by recorders.
pub type EventId = u32;

/// Log severity, ordered from least to most urgent.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Service that produced an event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Component {
    Power,
    Clock,
    Battery,
    Cycle,
}

impl Component {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Component::Power => "power",
            Component::Clock => "rtc",
            Component::Battery => "battery",
            Component::Cycle => "cycle",
        }
    }
}

/// Structured events emitted by the core services.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TelemetryEvent {
    RailSwitched { rail: Rail, enabled: bool },
    RailSettling { rail: Rail, settle: Duration },
    SleepClamped { requested: Duration, applied: Duration },
    SleepEntered { mode: SleepMode, duration: Duration },
    SleepResumed { mode: SleepMode, cause: WakeupCause, slept: Duration },
    LightSleepInterrupted { cause: WakeupCause },
    HardwareWarning(HardwareFault),
    BatteryLow { percent: f32 },
    BatteryCritical { percent: f32, emergency_enabled: bool },
    EmergencyEntered { reason: &'static str },
    EmergencyAlreadyActive,
    ShutdownRequested { emergency: bool },
    ConfigRejected(ValidationFault),
    HealthCheck { healthy: bool },
    OscillatorRestarted,
    SyncRecordLoaded { attempts: u16, successes: u16 },
    SyncRecordReset,
    TimeSynced { drift_seconds: Option<i32>, total_drift_seconds: i32 },
    TimeRejected(ValidationFault),
    BatteryReading { percent: u8, voltage_mv: u16 },
    SafetyViolation(SafetyViolation),
    BatteryUnavailable,
    CycleStarted { cycle: u32, cause: WakeupCause },
    ScanDrained { wifi: u16, ble: u16, dropped: u32 },
    UploadFinished { delivered: bool },
    SleepPlanned { hour: Option<u8>, night: bool, duration: Duration },
    Faulted(Fault),
}

impl TelemetryEvent {
    /// Compact discriminant used when events are shipped off-device.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            TelemetryEvent::RailSwitched { rail, enabled } => {
                let base = if *enabled { 0x0010 } else { 0x0018 };
                base + rail.as_code()
            }
            TelemetryEvent::RailSettling { .. } => 0x0020,
            TelemetryEvent::SleepClamped { .. } => 0x0030,
            TelemetryEvent::SleepEntered { .. } => 0x0031,
            TelemetryEvent::SleepResumed { .. } => 0x0032,
            TelemetryEvent::LightSleepInterrupted { .. } => 0x0033,
            TelemetryEvent::HardwareWarning(_) => 0x0040,
            TelemetryEvent::BatteryLow { .. } => 0x0050,
            TelemetryEvent::BatteryCritical { .. } => 0x0051,
            TelemetryEvent::EmergencyEntered { .. } => 0x0052,
            TelemetryEvent::EmergencyAlreadyActive => 0x0053,
            TelemetryEvent::ShutdownRequested { .. } => 0x0054,
            TelemetryEvent::ConfigRejected(_) => 0x0055,
            TelemetryEvent::HealthCheck { .. } => 0x0056,
            TelemetryEvent::OscillatorRestarted => 0x0060,
            TelemetryEvent::SyncRecordLoaded { .. } => 0x0061,
            TelemetryEvent::SyncRecordReset => 0x0062,
            TelemetryEvent::TimeSynced { .. } => 0x0063,
            TelemetryEvent::TimeRejected(_) => 0x0064,
            TelemetryEvent::BatteryReading { .. } => 0x0070,
            TelemetryEvent::SafetyViolation(_) => 0x0071,
            TelemetryEvent::BatteryUnavailable => 0x0072,
            TelemetryEvent::CycleStarted { .. } => 0x0080,
            TelemetryEvent::ScanDrained { .. } => 0x0081,
            TelemetryEvent::UploadFinished { .. } => 0x0082,
            TelemetryEvent::SleepPlanned { .. } => 0x0083,
            TelemetryEvent::Faulted(_) => 0x00FF,
        }
    }
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEvent::RailSwitched { rail, enabled } => {
                let state = if *enabled { "on" } else { "off" };
                write!(f, "rail {} {state}", rail.name())
            }
            TelemetryEvent::RailSettling { rail, settle } => {
                write!(f, "rail {} settling {}ms", rail.name(), settle.as_millis())
            }
            TelemetryEvent::SleepClamped { requested, applied } => write!(
                f,
                "sleep duration {}us clamped to {}us",
                requested.as_micros(),
                applied.as_micros()
            ),
            TelemetryEvent::SleepEntered { mode, duration } => {
                write!(f, "entering {} sleep for {}s", mode.label(), duration.as_secs())
            }
            TelemetryEvent::SleepResumed { mode, cause, slept } => write!(
                f,
                "resumed from {} sleep after {}ms cause={}",
                mode.label(),
                slept.as_millis(),
                cause.label()
            ),
            TelemetryEvent::LightSleepInterrupted { cause } => {
                write!(f, "light sleep interrupted by {}", cause.label())
            }
            TelemetryEvent::HardwareWarning(fault) => write!(f, "hardware warning: {fault}"),
            TelemetryEvent::BatteryLow { percent } => {
                write!(f, "low battery {percent:.1}%, shedding radios")
            }
            TelemetryEvent::BatteryCritical {
                percent,
                emergency_enabled,
            } => write!(
                f,
                "critical battery {percent:.1}% emergency={emergency_enabled}"
            ),
            TelemetryEvent::EmergencyEntered { reason } => write!(f, "emergency mode: {reason}"),
            TelemetryEvent::EmergencyAlreadyActive => f.write_str("emergency mode already active"),
            TelemetryEvent::ShutdownRequested { emergency } => {
                write!(f, "shutdown requested emergency={emergency}")
            }
            TelemetryEvent::ConfigRejected(fault) => write!(f, "configuration rejected: {fault}"),
            TelemetryEvent::HealthCheck { healthy } => write!(f, "health check healthy={healthy}"),
            TelemetryEvent::OscillatorRestarted => f.write_str("oscillator was halted, restarted"),
            TelemetryEvent::SyncRecordLoaded {
                attempts,
                successes,
            } => write!(f, "sync record loaded attempts={attempts} ok={successes}"),
            TelemetryEvent::SyncRecordReset => f.write_str("no valid sync record, counters reset"),
            TelemetryEvent::TimeSynced {
                drift_seconds,
                total_drift_seconds,
            } => match drift_seconds {
                Some(drift) => write!(
                    f,
                    "time synced drift={drift}s total={total_drift_seconds}s"
                ),
                None => write!(f, "time synced (first valid time) total={total_drift_seconds}s"),
            },
            TelemetryEvent::TimeRejected(fault) => write!(f, "network time rejected: {fault}"),
            TelemetryEvent::BatteryReading {
                percent,
                voltage_mv,
            } => write!(f, "battery {percent}% {voltage_mv}mV"),
            TelemetryEvent::SafetyViolation(violation) => write!(f, "safety limit: {violation}"),
            TelemetryEvent::BatteryUnavailable => f.write_str("fuel gauge unavailable"),
            TelemetryEvent::CycleStarted { cycle, cause } => {
                write!(f, "cycle {cycle} wake={}", cause.label())
            }
            TelemetryEvent::ScanDrained { wifi, ble, dropped } => {
                write!(f, "scan wifi={wifi} ble={ble} dropped={dropped}")
            }
            TelemetryEvent::UploadFinished { delivered } => {
                write!(f, "upload delivered={delivered}")
            }
            TelemetryEvent::SleepPlanned {
                hour,
                night,
                duration,
            } => match hour {
                Some(hour) => write!(
                    f,
                    "hour={hour} night={night} sleep={}s",
                    duration.as_secs()
                ),
                None => write!(f, "hour=unknown sleep={}s", duration.as_secs()),
            },
            TelemetryEvent::Faulted(fault) => write!(f, "{fault}"),
        }
    }
}

/// One event with its provenance.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord {
    pub severity: Severity,
    pub component: Component,
    pub event: TelemetryEvent,
}

impl TelemetryRecord {
    #[must_use]
    pub const fn new(severity: Severity, component: Component, event: TelemetryEvent) -> Self {
        Self {
            severity,
            component,
            event,
        }
    }
}

/// Destination for telemetry emitted by core services.
pub trait TelemetrySink {
    fn record(&mut self, record: TelemetryRecord);

    fn emit(&mut self, severity: Severity, component: Component, event: TelemetryEvent) {
        self.record(TelemetryRecord::new(severity, component, event));
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for &mut T {
    fn record(&mut self, record: TelemetryRecord) {
        (**self).record(record);
    }
}

/// Sink that discards everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&mut self, _record: TelemetryRecord) {}
}

/// Ring entry stamped with the recorder's sequence number.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RingEntry {
    pub id: EventId,
    pub record: TelemetryRecord,
}

/// Fixed-capacity history of the most recent records.
pub struct TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<RingEntry, CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRing<CAPACITY> {
    /// Creates an empty ring.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, RingEntry> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent entry, if available.
    pub fn latest(&self) -> Option<&RingEntry> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Counts stored records at or above `severity`.
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.ring
            .oldest_ordered()
            .filter(|entry| entry.record.severity >= severity)
            .count()
    }

    /// Returns `true` when any stored record satisfies `predicate`.
    pub fn contains(&self, mut predicate: impl FnMut(&TelemetryEvent) -> bool) -> bool {
        self.ring
            .oldest_ordered()
            .any(|entry| predicate(&entry.record.event))
    }
}

impl<const CAPACITY: usize> Default for TelemetryRing<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize> TelemetrySink for TelemetryRing<CAPACITY> {
    fn record(&mut self, record: TelemetryRecord) {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(RingEntry { id, record });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_newest_entries_in_order() {
        let mut ring = TelemetryRing::<4>::new();
        for cycle in 0..6 {
            ring.emit(
                Severity::Info,
                Component::Cycle,
                TelemetryEvent::CycleStarted {
                    cycle,
                    cause: WakeupCause::Timer,
                },
            );
        }

        assert_eq!(ring.len(), 4);
        let ids: heapless::Vec<EventId, 4> = ring.oldest_first().map(|entry| entry.id).collect();
        assert_eq!(ids.as_slice(), &[2, 3, 4, 5]);
        assert_eq!(ring.latest().map(|entry| entry.id), Some(5));
    }

    #[test]
    fn severity_filter_counts_urgent_records() {
        let mut ring = TelemetryRing::<8>::new();
        ring.emit(
            Severity::Info,
            Component::Clock,
            TelemetryEvent::OscillatorRestarted,
        );
        ring.emit(
            Severity::Critical,
            Component::Power,
            TelemetryEvent::EmergencyEntered { reason: "test" },
        );
        ring.emit(
            Severity::Warning,
            Component::Power,
            TelemetryEvent::EmergencyAlreadyActive,
        );

        assert_eq!(ring.count_at_least(Severity::Warning), 2);
        assert_eq!(ring.count_at_least(Severity::Critical), 1);
        assert!(ring.contains(|event| matches!(event, TelemetryEvent::OscillatorRestarted)));
    }

    #[test]
    fn rail_codes_are_distinct_per_direction() {
        let on = TelemetryEvent::RailSwitched {
            rail: Rail::External5V,
            enabled: true,
        };
        let off = TelemetryEvent::RailSwitched {
            rail: Rail::External5V,
            enabled: false,
        };
        assert_ne!(on.code(), off.code());
        assert_eq!(on.code(), 0x0010);
    }
}
