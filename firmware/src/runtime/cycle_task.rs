use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_time::{Duration, Timer};
use sensor_core::battery::{BatterySafetyMonitor, SafetyLimits};
use sensor_core::clock::RtcService;
use sensor_core::cycle::{CycleConfig, CycleOutcome, CycleReport, OperationCycle};
use sensor_core::power::{PeripheralConfig, PowerConfig, PowerController, WakeupPin};

use crate::hw::power::MAX_WATCHDOG_TIMEOUT;
use crate::hw::{Bq34z100, Ds1307, Stm32PowerHal};
use crate::scan::ScanQueue;
use crate::status;
use crate::telemetry::FirmwareTelemetry;
use crate::work::NodeWork;

/// Wait before retrying when sleep could not be entered.
const FAULT_BACKOFF: Duration = Duration::from_secs(10);

/// WKUP1 (PA0), active high: the field button.
const FIELD_BUTTON: WakeupPin = WakeupPin {
    pin: 1,
    level: true,
};

const BOARD_POWER_CONFIG: PowerConfig = PowerConfig {
    watchdog_timeout: MAX_WATCHDOG_TIMEOUT,
    wakeup_pin: Some(FIELD_BUTTON),
    ..PowerConfig::DEFAULT
};

/// The modem footprint is unpopulated on this board revision.
const BOARD_PROFILE: PeripheralConfig = PeripheralConfig {
    cellular: false,
    ..PeripheralConfig::ACTIVE
};

#[embassy_executor::task]
pub async fn run(
    power_hal: Stm32PowerHal,
    clock_bus: Ds1307,
    gauge: Bq34z100,
    scan: &'static ScanQueue,
) -> ! {
    let mut power = PowerController::new(power_hal, BOARD_POWER_CONFIG, FirmwareTelemetry::new());
    power.set_active_profile(BOARD_PROFILE);
    if let Err(fault) = power.initialize() {
        defmt::error!("power init failed: {}", defmt::Display2Format(&fault));
    }

    let clock: RtcService<ThreadModeRawMutex, _, FirmwareTelemetry> =
        RtcService::new(clock_bus, FirmwareTelemetry::new());
    if let Err(fault) = clock.initialize() {
        defmt::warn!("rtc init failed: {}", defmt::Display2Format(&fault));
    }

    let battery: BatterySafetyMonitor<ThreadModeRawMutex, _, FirmwareTelemetry> =
        BatterySafetyMonitor::new(gauge, SafetyLimits::DEFAULT, FirmwareTelemetry::new());

    let mut cycle: OperationCycle<FirmwareTelemetry> =
        OperationCycle::new(CycleConfig::DEFAULT, FirmwareTelemetry::new());
    let mut work = NodeWork::new();
    let mut queue = scan.endpoint();

    // Deep sleep resets the core, so on hardware this loop only turns over
    // when a cycle could not put the node to sleep.
    loop {
        let report = cycle.run(&mut power, &battery, &clock, &mut queue, &mut work);
        status::record_cycle(&report);
        status::record_power(&power.power_stats());
        status::record_sync(&clock.sync_status());
        log_summary(&report);

        if let CycleOutcome::Faulted(_) = report.outcome {
            if power.feed_watchdog().is_err() {
                defmt::warn!("watchdog not armed");
            }
            Timer::after(FAULT_BACKOFF).await;
        }
    }
}

fn log_summary(report: &CycleReport) {
    let snapshot = status::snapshot();
    defmt::info!(
        "cycle {} wake={} battery={} duty={}% syncs={}/{} sightings={} faults={}",
        report.cycle,
        report.wake.label(),
        snapshot.battery_percent,
        snapshot.duty_cycle_percent,
        snapshot.sync_successes,
        snapshot.sync_attempts,
        snapshot.sightings,
        snapshot.faults_logged
    );
}
