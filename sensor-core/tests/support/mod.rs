//! Scripted platform fakes shared by the integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use sensor_core::{Fault, HardwareFault};
use sensor_core::battery::{BatteryStatus, FuelGauge};
use sensor_core::clock::registers;
use sensor_core::clock::{DateTime, RtcBus};
use sensor_core::cycle::{CycleWork, ScanEvent, ScanEventProducer, ScanSource, UploadReport};
use sensor_core::power::{PowerHal, ResetReason, RetainedPowerState, WakeupCause, WakeupPin};
use sensor_core::sequences::{RAIL_COUNT, Rail};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HalCall {
    Rail(Rail, bool),
    Settle(Duration),
    Hold(Rail),
    ReleaseHolds,
    ArmWatchdog(Duration),
    FeedWatchdog,
    TimerWakeup(Duration),
    PinWakeup(u8),
    ClearWakeups,
    DeepSleep(Duration),
    LightSleep(Duration),
    Store(RetainedPowerState),
}

/// Records every platform call and advances a virtual clock through sleeps
/// and settle delays.
pub struct ScriptedHal {
    pub now_us: u64,
    pub rails: [bool; RAIL_COUNT],
    pub calls: Vec<HalCall>,
    pub retained: Option<RetainedPowerState>,
    pub reset: ResetReason,
    pub cause: WakeupCause,
    /// Causes returned by successive light sleeps; timer once exhausted.
    pub light_wakes: VecDeque<WakeupCause>,
    pub fail_rail: Option<Rail>,
}

impl ScriptedHal {
    pub fn new() -> Self {
        Self {
            now_us: 0,
            rails: [false; RAIL_COUNT],
            calls: Vec::new(),
            retained: None,
            reset: ResetReason::PowerOn,
            cause: WakeupCause::Undefined,
            light_wakes: VecDeque::new(),
            fail_rail: None,
        }
    }

    /// A board coming out of deep sleep with `retained` in backup memory.
    pub fn resumed_from(retained: RetainedPowerState) -> Self {
        Self {
            retained: Some(retained),
            reset: ResetReason::DeepSleep,
            cause: WakeupCause::Timer,
            ..Self::new()
        }
    }

    pub fn rail_transitions(&self) -> Vec<(Rail, bool)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HalCall::Rail(rail, enabled) => Some((*rail, *enabled)),
                _ => None,
            })
            .collect()
    }

    pub fn deep_sleeps(&self) -> Vec<Duration> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HalCall::DeepSleep(duration) => Some(*duration),
                _ => None,
            })
            .collect()
    }

    pub fn stored(&self) -> Vec<RetainedPowerState> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HalCall::Store(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, wanted: HalCall) -> Option<usize> {
        self.calls.iter().position(|call| *call == wanted)
    }

    fn advance(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.now_us = self.now_us.saturating_add(micros);
    }
}

impl PowerHal for ScriptedHal {
    fn monotonic_micros(&self) -> u64 {
        self.now_us
    }

    fn drive_rail(&mut self, rail: Rail, enabled: bool) -> Result<(), HardwareFault> {
        if self.fail_rail == Some(rail) {
            return Err(HardwareFault::GpioConfig);
        }
        self.rails[rail.as_index()] = enabled;
        self.calls.push(HalCall::Rail(rail, enabled));
        Ok(())
    }

    fn rail_enabled(&self, rail: Rail) -> bool {
        self.rails[rail.as_index()]
    }

    fn settle(&mut self, duration: Duration) {
        self.calls.push(HalCall::Settle(duration));
        self.advance(duration);
    }

    fn hold_rail(&mut self, rail: Rail) -> Result<(), HardwareFault> {
        self.calls.push(HalCall::Hold(rail));
        Ok(())
    }

    fn release_holds(&mut self) -> Result<(), HardwareFault> {
        self.calls.push(HalCall::ReleaseHolds);
        Ok(())
    }

    fn arm_watchdog(&mut self, timeout: Duration) -> Result<(), HardwareFault> {
        self.calls.push(HalCall::ArmWatchdog(timeout));
        Ok(())
    }

    fn feed_watchdog(&mut self) -> Result<(), HardwareFault> {
        self.calls.push(HalCall::FeedWatchdog);
        Ok(())
    }

    fn configure_timer_wakeup(&mut self, after: Duration) -> Result<(), HardwareFault> {
        self.calls.push(HalCall::TimerWakeup(after));
        Ok(())
    }

    fn configure_pin_wakeup(&mut self, pin: WakeupPin) -> Result<(), HardwareFault> {
        self.calls.push(HalCall::PinWakeup(pin.pin));
        Ok(())
    }

    fn clear_wakeup_sources(&mut self) {
        self.calls.push(HalCall::ClearWakeups);
    }

    fn deep_sleep(&mut self, duration: Duration) {
        self.calls.push(HalCall::DeepSleep(duration));
        self.advance(duration);
        self.cause = WakeupCause::Timer;
    }

    fn light_sleep(&mut self, duration: Duration) -> WakeupCause {
        self.calls.push(HalCall::LightSleep(duration));
        let cause = self.light_wakes.pop_front().unwrap_or(WakeupCause::Timer);
        if cause == WakeupCause::Timer {
            self.advance(duration);
        } else {
            self.advance(duration / 4);
        }
        self.cause = cause;
        cause
    }

    fn wakeup_cause(&self) -> WakeupCause {
        self.cause
    }

    fn reset_reason(&self) -> ResetReason {
        self.reset
    }

    fn store_retained(&mut self, state: &RetainedPowerState) -> Result<(), HardwareFault> {
        self.calls.push(HalCall::Store(*state));
        self.retained = Some(*state);
        Ok(())
    }

    fn load_retained(&mut self) -> Option<RetainedPowerState> {
        self.retained
    }
}

/// DS1307-style register file with battery-backed RAM.
pub struct RamChip {
    pub registers: [u8; 64],
    pub fail_reads: bool,
    pub fail_time_writes: bool,
}

impl RamChip {
    pub fn with_time(time: DateTime) -> Self {
        let mut chip = Self {
            registers: [0_u8; 64],
            fail_reads: false,
            fail_time_writes: false,
        };
        chip.set_time(time);
        chip
    }

    pub fn set_time(&mut self, time: DateTime) {
        self.registers[..registers::TIME_REGISTER_COUNT]
            .copy_from_slice(&registers::encode_time(&time));
    }

    pub fn time(&self) -> DateTime {
        let mut raw = [0_u8; registers::TIME_REGISTER_COUNT];
        raw.copy_from_slice(&self.registers[..registers::TIME_REGISTER_COUNT]);
        registers::decode_time(&raw)
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
        if self.fail_time_writes && start == registers::SECONDS && data.len() > 1 {
            return Err(HardwareFault::Bus);
        }
        let start = usize::from(start);
        self.registers[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Chip handle the test keeps while a service owns a clone, standing in
/// for the oscillator moving the registers between calls.
#[derive(Clone)]
pub struct SharedChip(pub Rc<RefCell<RamChip>>);

impl SharedChip {
    pub fn new(chip: RamChip) -> Self {
        Self(Rc::new(RefCell::new(chip)))
    }

    pub fn set_time(&self, time: DateTime) {
        self.0.borrow_mut().set_time(time);
    }

    pub fn time(&self) -> DateTime {
        self.0.borrow().time()
    }

    pub fn ram(&self) -> [u8; 64] {
        self.0.borrow().registers
    }
}

impl RtcBus for SharedChip {
    fn read_registers(&mut self, start: u8, buffer: &mut [u8]) -> Result<(), HardwareFault> {
        self.0.borrow_mut().read_registers(start, buffer)
    }

    fn write_registers(&mut self, start: u8, data: &[u8]) -> Result<(), HardwareFault> {
        self.0.borrow_mut().write_registers(start, data)
    }
}

pub const NOMINAL_BATTERY: BatteryStatus = BatteryStatus {
    voltage_mv: 3_950,
    current_ma: -85,
    state_of_charge: 72,
    state_of_health: 96,
    cell_temperature_c: 19,
    board_temperature_c: 22,
    cycle_count: 41,
    time_to_empty_min: 900,
};

/// Gauge whose reading the test can change while a monitor owns it.
#[derive(Clone)]
pub struct SharedGauge(Rc<Cell<Result<BatteryStatus, HardwareFault>>>);

impl SharedGauge {
    pub fn new(reading: Result<BatteryStatus, HardwareFault>) -> Self {
        Self(Rc::new(Cell::new(reading)))
    }

    pub fn set(&self, reading: Result<BatteryStatus, HardwareFault>) {
        self.0.set(reading);
    }

    pub fn set_charge(&self, percent: u8) {
        self.set(Ok(BatteryStatus {
            state_of_charge: percent,
            ..NOMINAL_BATTERY
        }));
    }
}

impl FuelGauge for SharedGauge {
    fn read_status(&mut self) -> Result<BatteryStatus, HardwareFault> {
        self.0.get()
    }
}

pub fn sighting(source: ScanSource, last_octet: u8) -> ScanEvent {
    ScanEvent {
        source,
        address: [0x02, 0x00, 0x5E, 0x10, 0x20, last_octet],
        rssi: -67,
        channel: if source == ScanSource::Wifi { 11 } else { 0 },
    }
}

/// Radio and storage stand-in.
pub struct ScriptedWork {
    pub sightings: Vec<ScanEvent>,
    pub recorded: Vec<ScanEvent>,
    pub uploads: u32,
    pub delivered: bool,
    pub network_time: Option<&'static str>,
    pub scan_fault: Option<Fault>,
}

impl ScriptedWork {
    pub fn new(sightings: Vec<ScanEvent>) -> Self {
        Self {
            sightings,
            recorded: Vec::new(),
            uploads: 0,
            delivered: true,
            network_time: None,
            scan_fault: None,
        }
    }
}

impl CycleWork for ScriptedWork {
    fn scan<P: ScanEventProducer>(&mut self, events: &mut P) -> Result<(), Fault> {
        for event in &self.sightings {
            // Overflow is counted by the queue itself.
            let _ = events.try_enqueue(*event);
        }
        match self.scan_fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn record(&mut self, event: &ScanEvent) {
        self.recorded.push(*event);
    }

    fn upload(&mut self) -> Result<UploadReport, Fault> {
        self.uploads += 1;
        Ok(UploadReport {
            delivered: self.delivered,
            network_time: self
                .network_time
                .and_then(|text| heapless::String::try_from(text).ok()),
        })
    }
}
