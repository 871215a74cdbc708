//! One wake of the sensing node: battery check, scan, optional upload,
//! schedule lookup and sleep.
//!
//! The orchestrator holds no hardware of its own. It drives the power
//! controller, the battery monitor and the clock service it is handed, and
//! talks to the radios and storage through [`CycleWork`]. Scan results reach
//! it through a bounded queue that platform capture code feeds.

use core::time::Duration;

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Deque;

use crate::battery::{BatteryAssessment, BatterySafetyMonitor, FuelGauge};
use crate::clock::{RtcBus, RtcService};
use crate::error::{Fault, ResourceExhaustion};
use crate::power::{PowerController, PowerHal, WakeupCause};
use crate::telemetry::{Component, Severity, TelemetryEvent, TelemetrySink};

/// Default depth of the scan event queue.
pub const SCAN_QUEUE_CAPACITY: usize = 32;
/// Upload on every Nth wake.
pub const DEFAULT_UPLOAD_EVERY: u32 = 6;
/// Reason recorded when a safety violation forces emergency mode.
pub const SAFETY_VIOLATION_REASON: &str = "battery safety violation";

/// Network time returned by an upload, in either accepted format.
pub type NetworkTimeText = heapless::String<32>;

/// Radio that produced a scan result.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScanSource {
    Wifi,
    Ble,
}

/// One device sighting.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScanEvent {
    pub source: ScanSource,
    pub address: [u8; 6],
    pub rssi: i8,
    /// WiFi channel; zero for BLE.
    pub channel: u8,
}

/// Error surfaced when an event cannot be enqueued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EnqueueError<E = ()> {
    QueueFull,
    Disconnected,
    Other(E),
}

/// Error surfaced when dequeueing fails.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DequeueError<E = ()> {
    Disconnected,
    Other(E),
}

/// Push side of the scan queue, used by capture code.
pub trait ScanEventProducer {
    type Error;

    /// Attempts to enqueue without blocking.
    fn try_enqueue(&mut self, event: ScanEvent) -> Result<(), EnqueueError<Self::Error>>;

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn len(&self) -> Option<usize> {
        None
    }

    fn is_empty(&self) -> Option<bool> {
        self.len().map(|current| current == 0)
    }
}

/// Pop side of the scan queue, drained by the orchestrator.
pub trait ScanEventConsumer {
    type Error;

    /// `Ok(None)` when the queue is currently empty.
    fn try_dequeue(&mut self) -> Result<Option<ScanEvent>, DequeueError<Self::Error>>;

    /// Events lost to overflow since the last call.
    fn take_dropped(&mut self) -> u32 {
        0
    }
}

/// Single-owner queue for hosts and tests.
#[derive(Debug)]
pub struct ScanEventQueue<const N: usize = SCAN_QUEUE_CAPACITY> {
    events: Deque<ScanEvent, N>,
    dropped: u32,
}

impl<const N: usize> ScanEventQueue<N> {
    pub const fn new() -> Self {
        Self {
            events: Deque::new(),
            dropped: 0,
        }
    }
}

impl<const N: usize> Default for ScanEventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ScanEventProducer for ScanEventQueue<N> {
    type Error = ();

    fn try_enqueue(&mut self, event: ScanEvent) -> Result<(), EnqueueError<()>> {
        self.events.push_back(event).map_err(|_| {
            self.dropped = self.dropped.saturating_add(1);
            EnqueueError::QueueFull
        })
    }

    fn capacity(&self) -> Option<usize> {
        Some(N)
    }

    fn len(&self) -> Option<usize> {
        Some(self.events.len())
    }
}

impl<const N: usize> ScanEventConsumer for ScanEventQueue<N> {
    type Error = ();

    fn try_dequeue(&mut self) -> Result<Option<ScanEvent>, DequeueError<()>> {
        Ok(self.events.pop_front())
    }

    fn take_dropped(&mut self) -> u32 {
        core::mem::take(&mut self.dropped)
    }
}

/// Result of an upload attempt.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UploadReport {
    pub delivered: bool,
    /// Time reported by the network, if the modem returned one.
    pub network_time: Option<NetworkTimeText>,
}

/// Radio and storage work performed between battery check and sleep.
pub trait CycleWork {
    /// Runs the WiFi/BLE scans, pushing sightings into `events`.
    fn scan<P: ScanEventProducer>(&mut self, events: &mut P) -> Result<(), Fault>;

    /// Stores one drained sighting.
    fn record(&mut self, event: &ScanEvent);

    /// Sends the stored data over cellular.
    fn upload(&mut self) -> Result<UploadReport, Fault>;
}

/// Orchestrator settings.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CycleConfig {
    /// Upload on every Nth wake; zero disables uploads.
    pub upload_every: u32,
    /// Also upload whenever the clock holds no valid time.
    pub upload_when_unsynced: bool,
}

impl CycleConfig {
    pub const DEFAULT: Self = Self {
        upload_every: DEFAULT_UPLOAD_EVERY,
        upload_when_unsynced: true,
    };

    #[must_use]
    pub const fn upload_due(&self, cycle: u32, time_valid: bool) -> bool {
        (self.upload_when_unsynced && !time_valid)
            || (self.upload_every > 0 && cycle % self.upload_every == 0)
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Sightings drained in one cycle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanTally {
    pub wifi: u16,
    pub ble: u16,
    pub dropped: u32,
}

impl ScanTally {
    fn count(&mut self, event: &ScanEvent) {
        match event.source {
            ScanSource::Wifi => self.wifi = self.wifi.saturating_add(1),
            ScanSource::Ble => self.ble = self.ble.saturating_add(1),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UploadSummary {
    pub delivered: bool,
    pub time_applied: bool,
}

/// How the cycle ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CycleOutcome {
    /// Slept on schedule and woke for the given reason.
    Slept { woke_by: WakeupCause },
    /// Battery policy took the emergency path.
    Emergency,
    /// Sleep could not be entered.
    Faulted(Fault),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CycleReport {
    /// Ordinal of this wake, counted across deep-sleep resets.
    pub cycle: u32,
    pub wake: WakeupCause,
    /// `None` when the gauge could not be read.
    pub battery_percent: Option<f32>,
    pub scan: Option<ScanTally>,
    pub upload: Option<UploadSummary>,
    pub hour: Option<u8>,
    pub planned_sleep: Duration,
    pub outcome: CycleOutcome,
}

/// Cold boots and timer or pin wakes run the scan; anything else only
/// re-checks the battery.
#[must_use]
pub const fn wake_runs_scan(cause: WakeupCause) -> bool {
    matches!(
        cause,
        WakeupCause::Timer | WakeupCause::External | WakeupCause::Undefined
    )
}

pub struct OperationCycle<T> {
    config: CycleConfig,
    telemetry: T,
}

impl<T: TelemetrySink> OperationCycle<T> {
    pub const fn new(config: CycleConfig, telemetry: T) -> Self {
        Self { config, telemetry }
    }

    pub fn config(&self) -> CycleConfig {
        self.config
    }

    pub fn set_config(&mut self, config: CycleConfig) {
        self.config = config;
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    fn log(&mut self, severity: Severity, event: TelemetryEvent) {
        self.telemetry.emit(severity, Component::Cycle, event);
    }

    /// Executes one wake and returns once the node has slept (or, on
    /// hardware, never returns because deep sleep resets the core).
    pub fn run<H, PT, BM, G, BT, CM, B, CT, Q, W>(
        &mut self,
        power: &mut PowerController<H, PT>,
        battery: &BatterySafetyMonitor<BM, G, BT>,
        clock: &RtcService<CM, B, CT>,
        queue: &mut Q,
        work: &mut W,
    ) -> CycleReport
    where
        H: PowerHal,
        PT: TelemetrySink,
        BM: RawMutex,
        G: FuelGauge,
        BT: TelemetrySink,
        CM: RawMutex,
        B: RtcBus,
        CT: TelemetrySink,
        Q: ScanEventProducer + ScanEventConsumer,
        W: CycleWork,
    {
        let wake = power.wakeup_cause();
        let cycle = power.state().sleep_cycles.saturating_add(1);
        self.log(Severity::Info, TelemetryEvent::CycleStarted { cycle, cause: wake });

        let mut report = CycleReport {
            cycle,
            wake,
            battery_percent: None,
            scan: None,
            upload: None,
            hour: None,
            planned_sleep: Duration::ZERO,
            outcome: CycleOutcome::Emergency,
        };

        let percent = match battery.assess() {
            BatteryAssessment::Healthy(status) => {
                report.battery_percent = Some(status.charge_percent());
                status.charge_percent()
            }
            BatteryAssessment::Violation { status, .. } => {
                report.battery_percent = Some(status.charge_percent());
                power.enter_emergency_mode(SAFETY_VIOLATION_REASON);
                return report;
            }
            BatteryAssessment::Unknown(_) => power.config().low_battery_percent,
        };
        if !power.check_battery_level(percent) {
            return report;
        }

        if wake_runs_scan(wake) {
            if let Err(fault) = power.enable_peripherals() {
                self.log(Severity::Error, TelemetryEvent::Faulted(fault));
            }
            if let Err(fault) = work.scan(queue) {
                self.log(Severity::Error, TelemetryEvent::Faulted(fault));
            }
            report.scan = Some(self.drain(queue, work));

            if self.config.upload_due(cycle, clock.is_time_valid()) {
                report.upload = Some(self.upload(clock, work));
            }
        }

        let schedule = clock.sleep_schedule();
        report.hour = clock.current_hour().ok();
        report.planned_sleep = clock.scheduled_sleep_duration();
        self.log(
            Severity::Info,
            TelemetryEvent::SleepPlanned {
                hour: report.hour,
                night: report
                    .hour
                    .is_some_and(|hour| schedule.enabled && schedule.is_night(hour)),
                duration: report.planned_sleep,
            },
        );

        if let Err(fault) = power.disable_peripherals() {
            self.log(Severity::Error, TelemetryEvent::Faulted(fault));
        }
        report.outcome = match power.enter_sleep(report.planned_sleep) {
            Ok(woke_by) => CycleOutcome::Slept { woke_by },
            Err(fault) => {
                self.log(Severity::Error, TelemetryEvent::Faulted(fault));
                CycleOutcome::Faulted(fault)
            }
        };
        report
    }

    fn drain<Q, W>(&mut self, queue: &mut Q, work: &mut W) -> ScanTally
    where
        Q: ScanEventConsumer,
        W: CycleWork,
    {
        let mut tally = ScanTally::default();
        loop {
            match queue.try_dequeue() {
                Ok(Some(event)) => {
                    tally.count(&event);
                    work.record(&event);
                }
                // A disconnected producer has nothing more for this cycle.
                Ok(None) | Err(_) => break,
            }
        }
        tally.dropped = queue.take_dropped();
        if tally.dropped > 0 {
            self.log(
                Severity::Warning,
                TelemetryEvent::Faulted(ResourceExhaustion::ScanQueueFull.into()),
            );
        }
        self.log(
            Severity::Info,
            TelemetryEvent::ScanDrained {
                wifi: tally.wifi,
                ble: tally.ble,
                dropped: tally.dropped,
            },
        );
        tally
    }

    fn upload<CM, B, CT, W>(&mut self, clock: &RtcService<CM, B, CT>, work: &mut W) -> UploadSummary
    where
        CM: RawMutex,
        B: RtcBus,
        CT: TelemetrySink,
        W: CycleWork,
    {
        let report = match work.upload() {
            Ok(report) => report,
            Err(fault) => {
                self.log(Severity::Error, TelemetryEvent::Faulted(fault));
                UploadReport::default()
            }
        };
        self.log(
            if report.delivered {
                Severity::Info
            } else {
                Severity::Warning
            },
            TelemetryEvent::UploadFinished {
                delivered: report.delivered,
            },
        );
        let time_applied = report
            .network_time
            .as_deref()
            .is_some_and(|text| clock.set_time_from_network(text).is_ok());
        UploadSummary {
            delivered: report.delivered,
            time_applied,
        }
    }
}
