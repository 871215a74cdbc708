//! The emulated node: core services wired to the simulated board.
//!
//! Deep sleep on the real board ends in a reset, so after every cycle that
//! slept the node is booted again with [`ResetReason::DeepSleep`] and both
//! services re-run their initialisation against the surviving state.

use std::time::Duration;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use sensor_core::Fault;
use sensor_core::battery::{BatterySafetyMonitor, SafetyLimits};
use sensor_core::clock::{DateTime, RtcService};
use sensor_core::cycle::{CycleConfig, CycleOutcome, CycleReport, OperationCycle, ScanEventQueue};
use sensor_core::power::{PowerConfig, PowerController, ResetReason, WakeupPin};

use crate::console::ConsoleTelemetry;
use crate::sim::{SimulatedChip, SimulatedGauge, SimulatedHal, SimulatedWork, VirtualClock};

/// Wake button on WKUP1, active high.
pub const WAKE_BUTTON: WakeupPin = WakeupPin {
    pin: 1,
    level: true,
};

/// Board and environment the node starts in.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NodeOptions {
    pub battery_percent: f64,
    pub drain_per_hour: f64,
    /// Wall-clock time at power-on; the network reports this.
    pub start: DateTime,
    /// Time held by the RTC at power-on; `None` is a factory-fresh chip.
    pub rtc_time: Option<DateTime>,
    pub drift_ppm: i32,
}

impl NodeOptions {
    pub const DEFAULT: Self = Self {
        battery_percent: 80.0,
        drain_per_hour: 0.5,
        start: DateTime::new(2025, 6, 1, 12, 0, 0),
        rtc_time: None,
        drift_ppm: 0,
    };
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

type Telemetry = ConsoleTelemetry;

pub struct Node {
    clock: VirtualClock,
    telemetry: Telemetry,
    power: PowerController<SimulatedHal, Telemetry>,
    battery: BatterySafetyMonitor<NoopRawMutex, SimulatedGauge, Telemetry>,
    rtc: RtcService<NoopRawMutex, SimulatedChip, Telemetry>,
    cycle: OperationCycle<Telemetry>,
    queue: ScanEventQueue,
    work: SimulatedWork,
    chip: SimulatedChip,
    gauge: SimulatedGauge,
    last_report: Option<CycleReport>,
}

impl Node {
    /// Builds the node and runs the power-on boot. Initialisation faults are
    /// returned alongside the node, which stays usable for inspection.
    pub fn power_on(options: &NodeOptions) -> (Self, Vec<Fault>) {
        let clock = VirtualClock::new();
        let telemetry = ConsoleTelemetry::new(clock.clone());

        let chip = match options.rtc_time {
            Some(time) => SimulatedChip::running(clock.clone(), time),
            None => SimulatedChip::halted(clock.clone()),
        };
        chip.set_drift_ppm(options.drift_ppm);
        let gauge = SimulatedGauge::new(
            clock.clone(),
            options.battery_percent,
            options.drain_per_hour,
        );

        let config = PowerConfig {
            wakeup_pin: Some(WAKE_BUTTON),
            ..PowerConfig::DEFAULT
        };
        let mut node = Self {
            power: PowerController::new(SimulatedHal::new(clock.clone()), config, telemetry.clone()),
            battery: BatterySafetyMonitor::new(
                gauge.clone(),
                SafetyLimits::DEFAULT,
                telemetry.clone(),
            ),
            rtc: RtcService::new(chip.clone(), telemetry.clone()),
            cycle: OperationCycle::new(CycleConfig::DEFAULT, telemetry.clone()),
            queue: ScanEventQueue::new(),
            work: SimulatedWork::new(clock.clone(), options.start),
            chip,
            gauge,
            clock,
            telemetry,
            last_report: None,
        };
        let faults = node.boot();
        (node, faults)
    }

    fn boot(&mut self) -> Vec<Fault> {
        let mut faults = Vec::new();
        if let Err(fault) = self.power.initialize() {
            faults.push(fault);
        }
        if let Err(fault) = self.rtc.initialize() {
            faults.push(fault);
        }
        faults
    }

    /// Resets the board for `reason` and boots again.
    pub fn restart(&mut self, reason: ResetReason) -> Vec<Fault> {
        self.power.hal_mut().reboot(reason);
        self.boot()
    }

    /// One wake of the node. A cycle that slept is followed by the reset the
    /// hardware would take on wakeup.
    pub fn run_cycle(&mut self) -> (CycleReport, Vec<Fault>) {
        let report = self.cycle.run(
            &mut self.power,
            &self.battery,
            &self.rtc,
            &mut self.queue,
            &mut self.work,
        );
        self.last_report = Some(report);

        let slept = !matches!(report.outcome, CycleOutcome::Faulted(_));
        let faults = if slept && !self.is_parked() {
            self.restart(ResetReason::DeepSleep)
        } else {
            Vec::new()
        };
        (report, faults)
    }

    /// Light sleep with the wake button armed. `true` when the timer ran out.
    pub fn nap(&mut self, duration: Duration) -> Result<bool, Fault> {
        self.power.enter_light_sleep(duration)
    }

    /// Persists the sync record and powers down until reset.
    pub fn shutdown(&mut self, emergency: bool) -> Result<(), Fault> {
        let persisted = self.rtc.shutdown();
        self.power.shutdown(emergency);
        persisted
    }

    pub fn is_parked(&self) -> bool {
        self.power.hal().is_parked()
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn power(&self) -> &PowerController<SimulatedHal, Telemetry> {
        &self.power
    }

    pub fn power_mut(&mut self) -> &mut PowerController<SimulatedHal, Telemetry> {
        &mut self.power
    }

    pub fn battery(&self) -> &BatterySafetyMonitor<NoopRawMutex, SimulatedGauge, Telemetry> {
        &self.battery
    }

    pub fn rtc(&self) -> &RtcService<NoopRawMutex, SimulatedChip, Telemetry> {
        &self.rtc
    }

    pub fn cycle_mut(&mut self) -> &mut OperationCycle<Telemetry> {
        &mut self.cycle
    }

    pub fn work(&self) -> &SimulatedWork {
        &self.work
    }

    pub fn work_mut(&mut self) -> &mut SimulatedWork {
        &mut self.work
    }

    pub fn chip(&self) -> &SimulatedChip {
        &self.chip
    }

    pub fn gauge(&self) -> &SimulatedGauge {
        &self.gauge
    }

    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_core::clock::TimeValidity;
    use sensor_core::power::WakeupCause;

    fn quiet(options: &NodeOptions) -> Node {
        let (node, faults) = Node::power_on(options);
        assert!(faults.is_empty(), "{faults:?}");
        node
    }

    #[test]
    fn first_cycle_syncs_a_factory_fresh_clock() {
        let mut node = quiet(&NodeOptions::DEFAULT);
        assert!(!node.rtc().is_time_valid());

        let (report, faults) = node.run_cycle();
        assert!(faults.is_empty());
        assert_eq!(report.cycle, 1);
        assert_eq!(report.wake, WakeupCause::Undefined);
        let upload = report.upload.expect("unsynced clock forces an upload");
        assert!(upload.delivered && upload.time_applied);
        assert_eq!(report.hour, Some(12));
        assert_eq!(report.planned_sleep, Duration::from_secs(300));
        assert_eq!(
            report.outcome,
            CycleOutcome::Slept {
                woke_by: WakeupCause::Timer
            }
        );

        // Rebooted out of deep sleep with the record reloaded from chip RAM.
        assert_eq!(node.power().state().last_reset_reason, ResetReason::DeepSleep);
        assert_eq!(node.rtc().validity(), TimeValidity::Unsynced);
        assert!(node.rtc().is_time_valid());
        assert_eq!(node.rtc().sync_status().successful_syncs, 1);
        assert_eq!(node.power().power_stats().sleep_cycles, 1);
    }

    #[test]
    fn counters_survive_repeated_deep_sleep_resets() {
        let mut node = quiet(&NodeOptions {
            rtc_time: Some(NodeOptions::DEFAULT.start),
            ..NodeOptions::DEFAULT
        });
        for expected in 1..=6 {
            let (report, _) = node.run_cycle();
            assert_eq!(report.cycle, expected);
        }
        let stats = node.power().power_stats();
        assert_eq!(stats.sleep_cycles, 6);
        assert_eq!(stats.total_sleep, Duration::from_secs(6 * 300));
        assert!(stats.duty_cycle_percent > 0.0 && stats.duty_cycle_percent < 5.0);
        // Sixth wake is the scheduled upload.
        assert!(node.last_report().and_then(|r| r.upload).is_some());
    }

    #[test]
    fn critical_battery_takes_the_emergency_sleep() {
        let mut node = quiet(&NodeOptions {
            battery_percent: 4.0,
            ..NodeOptions::DEFAULT
        });
        let before = node.clock().elapsed();
        let (report, _) = node.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Emergency);
        assert!(report.scan.is_none());
        assert!(node.clock().elapsed() - before >= Duration::from_secs(3_600));
        // The reset clears the flag; the next wake re-evaluates the battery.
        assert!(!node.power().is_emergency_mode());
    }

    #[test]
    fn shutdown_parks_until_reset() {
        let mut node = quiet(&NodeOptions::DEFAULT);
        node.shutdown(false).expect("record persisted");
        assert!(node.is_parked());
        assert!(node.restart(ResetReason::External).is_empty());
        assert!(!node.is_parked());
        assert_eq!(node.power().state().last_reset_reason, ResetReason::External);
    }
}
