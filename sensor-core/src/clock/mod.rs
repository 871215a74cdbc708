//! Real-time clock service: current time, network corrections, drift and
//! persisted sync statistics.
//!
//! All mutable state sits behind one blocking mutex so a status read from a
//! logging context never sees a half-applied sync.

use core::cell::RefCell;
use core::fmt::Write;
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::error::{Fault, HardwareFault, ResourceExhaustion, ValidationFault};
use crate::schedule::{SleepSchedule, compute_sleep_duration};
use crate::telemetry::{Component, Severity, TelemetryEvent, TelemetrySink};

pub mod datetime;
pub mod persist;
pub mod registers;

pub use datetime::{
    DateTime, NetworkTime, TimeFormat, drift_seconds, is_valid_time, parse_network_time,
};
pub use persist::{SYNC_RECORD_LEN, SYNC_RECORD_MAGIC, SyncRecord};

/// Formatted `YYYY-MM-DDTHH:MM:SS` timestamp.
pub type TimestampText = heapless::String<19>;

/// Register-level access to the RTC chip.
pub trait RtcBus {
    fn read_registers(&mut self, start: u8, buffer: &mut [u8]) -> Result<(), HardwareFault>;
    fn write_registers(&mut self, start: u8, data: &[u8]) -> Result<(), HardwareFault>;
}

impl<B: RtcBus + ?Sized> RtcBus for &mut B {
    fn read_registers(&mut self, start: u8, buffer: &mut [u8]) -> Result<(), HardwareFault> {
        (**self).read_registers(start, buffer)
    }

    fn write_registers(&mut self, start: u8, data: &[u8]) -> Result<(), HardwareFault> {
        (**self).write_registers(start, data)
    }
}

/// Validity of the time the service hands out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimeValidity {
    Uninitialized,
    /// Running on whatever the chip held at boot.
    Unsynced,
    /// Corrected from the network at least once this session.
    Synced,
}

/// Consistent snapshot of the sync bookkeeping.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RtcSyncStatus {
    pub validity: TimeValidity,
    pub has_valid_time: bool,
    pub last_sync: Option<DateTime>,
    pub sync_attempts: u16,
    pub successful_syncs: u16,
    pub failed_syncs: u16,
    pub total_drift_seconds: i32,
    pub last_fault: Option<Fault>,
}

impl RtcSyncStatus {
    /// Mean absolute drift per successful sync, zero before the first one.
    #[must_use]
    pub fn average_drift_seconds(&self) -> f32 {
        if self.successful_syncs == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let total = self.total_drift_seconds as f32;
        total / f32::from(self.successful_syncs)
    }
}

/// Result of an accepted network time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SyncOutcome {
    pub time: NetworkTime,
    /// `None` when there was no trustworthy hardware time to compare with.
    pub drift_seconds: Option<i32>,
    pub persisted: bool,
}

struct ClockState<B, T> {
    bus: B,
    telemetry: T,
    validity: TimeValidity,
    has_valid_time: bool,
    last_sync: Option<DateTime>,
    record: SyncRecord,
    schedule: SleepSchedule,
    last_fault: Option<Fault>,
}

impl<B: RtcBus, T: TelemetrySink> ClockState<B, T> {
    fn log(&mut self, severity: Severity, event: TelemetryEvent) {
        self.telemetry.emit(severity, Component::Clock, event);
    }

    fn fail(&mut self, fault: Fault) -> Fault {
        self.last_fault = Some(fault);
        self.log(Severity::Error, TelemetryEvent::Faulted(fault));
        fault
    }

    fn ensure_initialized(&self) -> Result<(), Fault> {
        if self.validity == TimeValidity::Uninitialized {
            Err(Fault::NotInitialized)
        } else {
            Ok(())
        }
    }

    fn read_time(&mut self) -> Result<DateTime, HardwareFault> {
        let mut raw = [0_u8; registers::TIME_REGISTER_COUNT];
        self.bus.read_registers(registers::SECONDS, &mut raw)?;
        Ok(registers::decode_time(&raw))
    }

    fn write_time(&mut self, time: &DateTime) -> Result<(), HardwareFault> {
        self.bus
            .write_registers(registers::SECONDS, &registers::encode_time(time))
    }

    fn load_record(&mut self) {
        let mut raw = [0_u8; SYNC_RECORD_LEN];
        let start = registers::RAM_START + persist::SYNC_RECORD_OFFSET;
        let decoded = match self.bus.read_registers(start, &mut raw) {
            Ok(()) => SyncRecord::decode(&raw),
            Err(fault) => {
                self.log(Severity::Warning, TelemetryEvent::HardwareWarning(fault));
                None
            }
        };

        if let Some(record) = decoded {
            self.record = record;
            self.log(
                Severity::Info,
                TelemetryEvent::SyncRecordLoaded {
                    attempts: record.attempts,
                    successes: record.successes,
                },
            );
        } else {
            self.record = SyncRecord::ZERO;
            self.log(Severity::Info, TelemetryEvent::SyncRecordReset);
        }
    }

    fn persist_record(&mut self) -> bool {
        let encoded = self.record.encode();
        let start = registers::RAM_START + persist::SYNC_RECORD_OFFSET;
        if self.bus.write_registers(start, &encoded).is_ok() {
            true
        } else {
            let fault = Fault::ResourceExhausted(ResourceExhaustion::PersistWrite);
            self.last_fault = Some(fault);
            self.log(Severity::Warning, TelemetryEvent::Faulted(fault));
            false
        }
    }
}

/// RTC service generic over the mutex flavour, the chip bus and the sink.
pub struct RtcService<M: RawMutex, B, T> {
    state: Mutex<M, RefCell<ClockState<B, T>>>,
}

impl<M, B, T> RtcService<M, B, T>
where
    M: RawMutex,
    B: RtcBus,
    T: TelemetrySink,
{
    /// Creates an uninitialised service with the factory sleep schedule.
    pub const fn new(bus: B, telemetry: T) -> Self {
        Self {
            state: Mutex::new(RefCell::new(ClockState {
                bus,
                telemetry,
                validity: TimeValidity::Uninitialized,
                has_valid_time: false,
                last_sync: None,
                record: SyncRecord::ZERO,
                schedule: SleepSchedule::DEFAULT,
                last_fault: None,
            })),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ClockState<B, T>) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Starts the oscillator if halted, loads persisted statistics and moves
    /// to [`TimeValidity::Unsynced`].
    pub fn initialize(&self) -> Result<(), Fault> {
        self.with_state(|state| {
            let mut seconds = [0_u8; 1];
            if let Err(fault) = state.bus.read_registers(registers::SECONDS, &mut seconds) {
                return Err(state.fail(fault.into()));
            }

            if seconds[0] & registers::CLOCK_HALT != 0 {
                let restarted = [seconds[0] & !registers::CLOCK_HALT];
                if state
                    .bus
                    .write_registers(registers::SECONDS, &restarted)
                    .is_err()
                {
                    return Err(state.fail(HardwareFault::OscillatorHalted.into()));
                }
                state.log(Severity::Warning, TelemetryEvent::OscillatorRestarted);
            }

            if let Err(fault) = state
                .bus
                .write_registers(registers::CONTROL, &[registers::CONTROL_SQW_OFF])
            {
                state.log(Severity::Warning, TelemetryEvent::HardwareWarning(fault));
            }

            state.has_valid_time = match state.read_time() {
                Ok(time) => time.is_plausible(),
                Err(fault) => {
                    state.log(Severity::Warning, TelemetryEvent::HardwareWarning(fault));
                    false
                }
            };

            state.load_record();
            state.validity = TimeValidity::Unsynced;
            Ok(())
        })
    }

    /// Applies a network time correction.
    ///
    /// Parse failures leave every counter untouched. A failed register write
    /// counts as an attempt without a success.
    pub fn set_time_from_network(&self, text: &str) -> Result<SyncOutcome, Fault> {
        self.with_state(|state| {
            state.ensure_initialized()?;

            let parsed = match parse_network_time(text) {
                Ok(parsed) => parsed,
                Err(fault) => {
                    state.last_fault = Some(fault.into());
                    state.log(Severity::Warning, TelemetryEvent::TimeRejected(fault));
                    return Err(fault.into());
                }
            };
            if parsed.local.is_unset_sentinel() {
                let fault = ValidationFault::UnsetSentinel;
                state.last_fault = Some(fault.into());
                state.log(Severity::Warning, TelemetryEvent::TimeRejected(fault));
                return Err(fault.into());
            }

            let compare_with_hardware =
                state.validity == TimeValidity::Synced || state.has_valid_time;
            let drift = if compare_with_hardware {
                match state.read_time() {
                    Ok(hardware) => Some(drift_seconds(&parsed.local, &hardware)),
                    Err(fault) => {
                        state.log(Severity::Warning, TelemetryEvent::HardwareWarning(fault));
                        None
                    }
                }
            } else {
                None
            };

            if let Err(fault) = state.write_time(&parsed.local) {
                state.record.attempts = state.record.attempts.saturating_add(1);
                return Err(state.fail(fault.into()));
            }

            if let Some(drift) = drift {
                state.record.total_drift_seconds = state
                    .record
                    .total_drift_seconds
                    .saturating_add(drift.saturating_abs());
            }
            state.record.attempts = state.record.attempts.saturating_add(1);
            state.record.successes = state.record.successes.saturating_add(1);
            state.last_sync = Some(parsed.local);
            state.has_valid_time = true;
            state.validity = TimeValidity::Synced;

            let total = state.record.total_drift_seconds;
            state.log(
                Severity::Info,
                TelemetryEvent::TimeSynced {
                    drift_seconds: drift,
                    total_drift_seconds: total,
                },
            );

            let persisted = state.persist_record();
            Ok(SyncOutcome {
                time: parsed,
                drift_seconds: drift,
                persisted,
            })
        })
    }

    /// Reads the chip. Failures are recorded and returned.
    pub fn current_date_time(&self) -> Result<DateTime, Fault> {
        self.with_state(|state| {
            state.ensure_initialized()?;
            state.read_time().map_err(|fault| state.fail(fault.into()))
        })
    }

    /// Current time as `YYYY-MM-DDTHH:MM:SS`.
    pub fn current_timestamp(&self) -> Result<TimestampText, Fault> {
        let time = self.current_date_time()?;
        let mut text = TimestampText::new();
        // 19 characters always fit.
        let _ = write!(text, "{time}");
        Ok(text)
    }

    pub fn current_hour(&self) -> Result<u8, Fault> {
        self.current_date_time().map(|time| time.hour)
    }

    /// Returns `true` when the chip currently holds a plausible time.
    pub fn is_time_valid(&self) -> bool {
        self.current_date_time()
            .is_ok_and(|time| time.is_plausible())
    }

    pub fn sync_status(&self) -> RtcSyncStatus {
        self.with_state(|state| RtcSyncStatus {
            validity: state.validity,
            has_valid_time: state.has_valid_time,
            last_sync: state.last_sync,
            sync_attempts: state.record.attempts,
            successful_syncs: state.record.successes,
            failed_syncs: state.record.failures(),
            total_drift_seconds: state.record.total_drift_seconds,
            last_fault: state.last_fault,
        })
    }

    pub fn validity(&self) -> TimeValidity {
        self.with_state(|state| state.validity)
    }

    pub fn sleep_schedule(&self) -> SleepSchedule {
        self.with_state(|state| state.schedule)
    }

    pub fn set_sleep_schedule(&self, schedule: SleepSchedule) {
        self.with_state(|state| state.schedule = schedule);
    }

    /// Sleep duration for the current hour; the day duration when the clock
    /// cannot be read.
    pub fn scheduled_sleep_duration(&self) -> Duration {
        let schedule = self.sleep_schedule();
        match self.current_hour() {
            Ok(hour) => compute_sleep_duration(hour, &schedule),
            Err(_) => schedule.day_sleep,
        }
    }

    /// Readable and running.
    pub fn perform_health_check(&self) -> bool {
        self.with_state(|state| {
            if state.ensure_initialized().is_err() {
                return false;
            }
            let mut seconds = [0_u8; 1];
            let healthy = state
                .bus
                .read_registers(registers::SECONDS, &mut seconds)
                .is_ok()
                && seconds[0] & registers::CLOCK_HALT == 0;
            state.log(
                if healthy {
                    Severity::Debug
                } else {
                    Severity::Warning
                },
                TelemetryEvent::HealthCheck { healthy },
            );
            healthy
        })
    }

    /// Persists the statistics for a clean power-down.
    pub fn shutdown(&self) -> Result<(), Fault> {
        self.with_state(|state| {
            state.ensure_initialized()?;
            if state.persist_record() {
                Ok(())
            } else {
                Err(Fault::ResourceExhausted(ResourceExhaustion::PersistWrite))
            }
        })
    }

    /// Consumes the service and hands back its bus and sink.
    pub fn release(self) -> (B, T) {
        let state = self.state.into_inner().into_inner();
        (state.bus, state.telemetry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use crate::telemetry::TelemetryRing;

    struct RamChip {
        registers: [u8; 64],
        fail_reads: bool,
        fail_writes_at: Option<u8>,
    }

    impl RamChip {
        fn with_time(time: DateTime) -> Self {
            let mut registers = [0_u8; 64];
            registers[..registers::TIME_REGISTER_COUNT]
                .copy_from_slice(&registers::encode_time(&time));
            Self {
                registers,
                fail_reads: false,
                fail_writes_at: None,
            }
        }
    }

    impl RtcBus for RamChip {
        fn read_registers(&mut self, start: u8, buffer: &mut [u8]) -> Result<(), HardwareFault> {
            if self.fail_reads {
                return Err(HardwareFault::Bus);
            }
            let start = usize::from(start);
            buffer.copy_from_slice(&self.registers[start..start + buffer.len()]);
            Ok(())
        }

        fn write_registers(&mut self, start: u8, data: &[u8]) -> Result<(), HardwareFault> {
            if self.fail_writes_at == Some(start) {
                return Err(HardwareFault::Bus);
            }
            let start = usize::from(start);
            self.registers[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }
    }

    type Service = RtcService<NoopRawMutex, RamChip, TelemetryRing<32>>;

    fn service(chip: RamChip) -> Service {
        RtcService::new(chip, TelemetryRing::new())
    }

    #[test]
    fn operations_require_initialization() {
        let rtc = service(RamChip::with_time(DateTime::new(2025, 1, 2, 3, 4, 5)));
        assert_eq!(rtc.validity(), TimeValidity::Uninitialized);
        assert_eq!(rtc.current_date_time(), Err(Fault::NotInitialized));
        assert_eq!(
            rtc.set_time_from_network("2025-01-02T03:04:05Z"),
            Err(Fault::NotInitialized)
        );
    }

    #[test]
    fn halted_oscillator_is_restarted() {
        let mut chip = RamChip::with_time(DateTime::new(2025, 1, 2, 3, 4, 5));
        chip.registers[0] |= registers::CLOCK_HALT;
        let rtc = service(chip);

        rtc.initialize().expect("init");
        let (chip, ring) = rtc.release();
        assert_eq!(chip.registers[0] & registers::CLOCK_HALT, 0);
        assert!(ring.contains(|event| matches!(event, TelemetryEvent::OscillatorRestarted)));
    }

    #[test]
    fn failed_oscillator_restart_aborts_initialization() {
        let mut chip = RamChip::with_time(DateTime::UNSET);
        chip.registers[0] |= registers::CLOCK_HALT;
        chip.fail_writes_at = Some(registers::SECONDS);
        let rtc = service(chip);

        assert_eq!(
            rtc.initialize(),
            Err(Fault::Hardware(HardwareFault::OscillatorHalted))
        );
        assert_eq!(rtc.validity(), TimeValidity::Uninitialized);
    }

    #[test]
    fn unreadable_chip_fails_initialization() {
        let mut chip = RamChip::with_time(DateTime::UNSET);
        chip.fail_reads = true;
        let rtc = service(chip);
        assert_eq!(rtc.initialize(), Err(Fault::Hardware(HardwareFault::Bus)));
    }

    #[test]
    fn first_sync_on_unset_chip_records_no_drift() {
        let rtc = service(RamChip::with_time(DateTime::UNSET));
        rtc.initialize().expect("init");
        assert!(!rtc.sync_status().has_valid_time);

        let outcome = rtc
            .set_time_from_network("25/07/29,21:30:00+08")
            .expect("sync");
        assert_eq!(outcome.drift_seconds, None);
        assert!(outcome.persisted);

        let status = rtc.sync_status();
        assert_eq!(status.validity, TimeValidity::Synced);
        assert_eq!(status.sync_attempts, 1);
        assert_eq!(status.successful_syncs, 1);
        assert_eq!(status.total_drift_seconds, 0);
        assert_eq!(
            rtc.current_date_time(),
            Ok(DateTime::new(2025, 7, 29, 21, 30, 0))
        );
        assert_eq!(rtc.current_hour(), Ok(21));
    }

    #[test]
    fn drift_is_measured_against_valid_boot_time() {
        let rtc = service(RamChip::with_time(DateTime::new(2025, 7, 29, 21, 29, 50)));
        rtc.initialize().expect("init");
        assert!(rtc.sync_status().has_valid_time);

        let outcome = rtc
            .set_time_from_network("2025-07-29T21:30:00Z")
            .expect("sync");
        assert_eq!(outcome.drift_seconds, Some(10));
        assert_eq!(rtc.sync_status().total_drift_seconds, 10);
        let average = rtc.sync_status().average_drift_seconds();
        assert!(average > 9.99 && average < 10.01);
    }

    #[test]
    fn malformed_or_sentinel_time_leaves_counters_alone() {
        let rtc = service(RamChip::with_time(DateTime::UNSET));
        rtc.initialize().expect("init");

        assert!(matches!(
            rtc.set_time_from_network("garbage"),
            Err(Fault::Validation(_))
        ));
        assert!(matches!(
            rtc.set_time_from_network("2000-01-01T00:00:00Z"),
            Err(Fault::Validation(ValidationFault::UnsetSentinel))
        ));

        let status = rtc.sync_status();
        assert_eq!(status.sync_attempts, 0);
        assert_eq!(status.successful_syncs, 0);
        assert_eq!(status.validity, TimeValidity::Unsynced);
        assert!(status.last_fault.is_some());
    }

    #[test]
    fn register_write_failure_counts_failed_attempt() {
        let mut chip = RamChip::with_time(DateTime::UNSET);
        chip.fail_writes_at = Some(registers::SECONDS);
        let rtc = service(chip);
        rtc.initialize().expect("init");

        assert_eq!(
            rtc.set_time_from_network("2025-07-29T21:30:00Z"),
            Err(Fault::Hardware(HardwareFault::Bus))
        );
        let status = rtc.sync_status();
        assert_eq!(status.sync_attempts, 1);
        assert_eq!(status.successful_syncs, 0);
        assert_eq!(status.failed_syncs, 1);
    }

    #[test]
    fn persist_failure_is_not_fatal() {
        let mut chip = RamChip::with_time(DateTime::UNSET);
        chip.fail_writes_at = Some(registers::RAM_START);
        let rtc = service(chip);
        rtc.initialize().expect("init");

        let outcome = rtc
            .set_time_from_network("2025-07-29T21:30:00Z")
            .expect("sync still succeeds");
        assert!(!outcome.persisted);
        assert_eq!(
            rtc.sync_status().last_fault,
            Some(Fault::ResourceExhausted(ResourceExhaustion::PersistWrite))
        );
        assert_eq!(rtc.sync_status().successful_syncs, 1);
    }

    #[test]
    fn scheduled_sleep_follows_clock_hour() {
        let rtc = service(RamChip::with_time(DateTime::new(2025, 7, 29, 23, 0, 0)));
        rtc.initialize().expect("init");
        assert_eq!(
            rtc.scheduled_sleep_duration(),
            crate::schedule::DEFAULT_NIGHT_SLEEP
        );

        rtc.set_time_from_network("2025-07-30T12:00:00Z")
            .expect("sync");
        assert_eq!(
            rtc.scheduled_sleep_duration(),
            crate::schedule::DEFAULT_DAY_SLEEP
        );

        rtc.set_sleep_schedule(SleepSchedule::DEFAULT.disabled());
        rtc.set_time_from_network("2025-07-30T02:00:00Z")
            .expect("sync");
        assert_eq!(
            rtc.scheduled_sleep_duration(),
            crate::schedule::DEFAULT_DAY_SLEEP
        );
    }

    #[test]
    fn timestamp_and_health_check() {
        let rtc = service(RamChip::with_time(DateTime::new(2025, 7, 4, 3, 2, 1)));
        assert!(!rtc.perform_health_check());
        rtc.initialize().expect("init");
        assert_eq!(
            rtc.current_timestamp().expect("readable").as_str(),
            "2025-07-04T03:02:01"
        );
        assert!(rtc.perform_health_check());
        assert!(rtc.is_time_valid());
    }
}
