#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! Lightweight atomics keep the latest cycle outcome, battery reading, duty
//! cycle and sync counters so the cycle task can log a one-line summary
//! without borrowing the services again.

use sensor_core::clock::RtcSyncStatus;
use sensor_core::cycle::{CycleOutcome, CycleReport};
use sensor_core::power::{PowerStats, WakeupCause};
use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

const UNKNOWN_BATTERY: u32 = 0;

/// Ordinal of the last completed cycle.
static CYCLE: AtomicU32 = AtomicU32::new(0);
/// Battery charge in tenths of a percent, +1 (0 == unknown).
static BATTERY_TENTHS: AtomicU32 = AtomicU32::new(UNKNOWN_BATTERY);
/// Encoded [`WakeupCause`] of the last cycle.
static LAST_WAKE: AtomicU8 = AtomicU8::new(0);
static EMERGENCY: AtomicBool = AtomicBool::new(false);
/// Duty cycle in hundredths of a percent.
static DUTY_HUNDREDTHS: AtomicU32 = AtomicU32::new(0);
static SLEEP_CYCLES: AtomicU32 = AtomicU32::new(0);
static SYNC_ATTEMPTS: AtomicU32 = AtomicU32::new(0);
static SYNC_SUCCESSES: AtomicU32 = AtomicU32::new(0);
static SIGHTINGS: AtomicU32 = AtomicU32::new(0);
static FAULTS_LOGGED: AtomicU32 = AtomicU32::new(0);

/// Point-in-time copy of the status atomics.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NodeStatus {
    pub cycle: u32,
    pub battery_percent: Option<f32>,
    pub last_wake: WakeupCause,
    pub emergency: bool,
    pub duty_cycle_percent: f32,
    pub sleep_cycles: u32,
    pub sync_attempts: u32,
    pub sync_successes: u32,
    pub sightings: u32,
    pub faults_logged: u32,
}

const fn encode_wake(cause: WakeupCause) -> u8 {
    match cause {
        WakeupCause::Undefined => 0,
        WakeupCause::Timer => 1,
        WakeupCause::External => 2,
        WakeupCause::Unknown => 3,
    }
}

const fn decode_wake(raw: u8) -> WakeupCause {
    match raw {
        0 => WakeupCause::Undefined,
        1 => WakeupCause::Timer,
        2 => WakeupCause::External,
        _ => WakeupCause::Unknown,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn encode_percent(percent: Option<f32>) -> u32 {
    match percent {
        Some(value) => (value.clamp(0.0, 100.0) * 10.0) as u32 + 1,
        None => UNKNOWN_BATTERY,
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_percent(raw: u32) -> Option<f32> {
    match raw {
        UNKNOWN_BATTERY => None,
        value => Some((value - 1) as f32 / 10.0),
    }
}

/// Stores the headline numbers of a finished cycle.
pub fn record_cycle(report: &CycleReport) {
    CYCLE.store(report.cycle, Ordering::Relaxed);
    BATTERY_TENTHS.store(encode_percent(report.battery_percent), Ordering::Relaxed);
    LAST_WAKE.store(encode_wake(report.wake), Ordering::Relaxed);
    EMERGENCY.store(
        matches!(report.outcome, CycleOutcome::Emergency),
        Ordering::Relaxed,
    );
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn record_power(stats: &PowerStats) {
    let hundredths = (stats.duty_cycle_percent.clamp(0.0, 100.0) * 100.0) as u32;
    DUTY_HUNDREDTHS.store(hundredths, Ordering::Relaxed);
    SLEEP_CYCLES.store(stats.sleep_cycles, Ordering::Relaxed);
}

pub fn record_sync(status: &RtcSyncStatus) {
    SYNC_ATTEMPTS.store(u32::from(status.sync_attempts), Ordering::Relaxed);
    SYNC_SUCCESSES.store(u32::from(status.successful_syncs), Ordering::Relaxed);
}

pub fn record_sighting() {
    SIGHTINGS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_fault_logged() {
    FAULTS_LOGGED.fetch_add(1, Ordering::Relaxed);
}

/// Builds a [`NodeStatus`] from the stored metrics.
#[allow(clippy::cast_precision_loss)]
pub fn snapshot() -> NodeStatus {
    NodeStatus {
        cycle: CYCLE.load(Ordering::Relaxed),
        battery_percent: decode_percent(BATTERY_TENTHS.load(Ordering::Relaxed)),
        last_wake: decode_wake(LAST_WAKE.load(Ordering::Relaxed)),
        emergency: EMERGENCY.load(Ordering::Relaxed),
        duty_cycle_percent: DUTY_HUNDREDTHS.load(Ordering::Relaxed) as f32 / 100.0,
        sleep_cycles: SLEEP_CYCLES.load(Ordering::Relaxed),
        sync_attempts: SYNC_ATTEMPTS.load(Ordering::Relaxed),
        sync_successes: SYNC_SUCCESSES.load(Ordering::Relaxed),
        sightings: SIGHTINGS.load(Ordering::Relaxed),
        faults_logged: FAULTS_LOGGED.load(Ordering::Relaxed),
    }
}
