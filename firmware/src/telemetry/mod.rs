//! Telemetry sink handed to the core services.
//!
//! Every record lands in a fixed-capacity ring so the cycle task can attach
//! recent history to uploads, and is mirrored to defmt (or stdout on host
//! builds) for bring-up. Error and critical records also bump the fault
//! counter in [`crate::status`].

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use sensor_core::telemetry::{
    Component, RingEntry, Severity, TelemetryEvent, TelemetryRecord, TelemetryRing,
    TelemetrySink,
};

use crate::status;

/// Records kept per service.
pub const SERVICE_RING_CAPACITY: usize = 32;

/// Ring-backed sink that mirrors each record to the log transport.
pub struct FirmwareTelemetry<const N: usize = SERVICE_RING_CAPACITY> {
    ring: TelemetryRing<N>,
    min_severity: Severity,
}

impl<const N: usize> FirmwareTelemetry<N> {
    pub const fn new() -> Self {
        Self {
            ring: TelemetryRing::new(),
            min_severity: Severity::Info,
        }
    }

    /// Raises or lowers the level below which records are kept but not logged.
    pub fn set_min_severity(&mut self, severity: Severity) {
        self.min_severity = severity;
    }

    pub fn ring(&self) -> &TelemetryRing<N> {
        &self.ring
    }

    pub fn latest(&self) -> Option<&RingEntry> {
        self.ring.latest()
    }
}

impl<const N: usize> Default for FirmwareTelemetry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TelemetrySink for FirmwareTelemetry<N> {
    fn record(&mut self, record: TelemetryRecord) {
        if record.severity >= Severity::Error {
            status::record_fault_logged();
        }
        if record.severity >= self.min_severity {
            emit_log(record.severity, record.component, &record.event);
        }
        self.ring.record(record);
    }
}

#[cfg(target_os = "none")]
fn emit_log(severity: Severity, component: Component, event: &TelemetryEvent) {
    let label = component.label();
    let code = event.code();
    let message = defmt::Display2Format(event);
    match severity {
        Severity::Debug => defmt::debug!("{} [{=u16:#x}] {}", label, code, message),
        Severity::Info => defmt::info!("{} [{=u16:#x}] {}", label, code, message),
        Severity::Warning => defmt::warn!("{} [{=u16:#x}] {}", label, code, message),
        Severity::Error => defmt::error!("{} [{=u16:#x}] {}", label, code, message),
        Severity::Critical => {
            defmt::error!("CRITICAL {} [{=u16:#x}] {}", label, code, message);
        }
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(severity: Severity, component: Component, event: &TelemetryEvent) {
    println!(
        "{} {} [{:#x}] {}",
        severity.label(),
        component.label(),
        event.code(),
        event
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_core::HardwareFault;
    use sensor_core::power::WakeupCause;

    #[test]
    fn keeps_records_below_the_log_threshold() {
        let mut sink: FirmwareTelemetry<4> = FirmwareTelemetry::new();
        sink.set_min_severity(Severity::Critical);
        sink.emit(
            Severity::Debug,
            Component::Cycle,
            TelemetryEvent::CycleStarted {
                cycle: 1,
                cause: WakeupCause::Timer,
            },
        );
        assert_eq!(sink.ring().len(), 1);
        assert_eq!(sink.latest().map(|entry| entry.id), Some(0));
    }

    #[test]
    fn errors_count_towards_fault_total() {
        let before = status::snapshot().faults_logged;
        let mut sink: FirmwareTelemetry<4> = FirmwareTelemetry::new();
        sink.emit(
            Severity::Error,
            Component::Battery,
            TelemetryEvent::HardwareWarning(HardwareFault::FuelGauge),
        );
        assert!(status::snapshot().faults_logged > before);
    }
}
