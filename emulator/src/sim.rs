//! Host stand-ins for the node's hardware, all driven by one virtual clock.
//!
//! Nothing here sleeps for real: deep sleep, settle delays and the RTC
//! oscillator only move [`VirtualClock`] forward, so a day of cycles runs in
//! milliseconds and every run is reproducible.

use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::ops::Range;
use std::rc::Rc;
use std::time::Duration;

use sensor_core::battery::{BatteryStatus, FuelGauge};
use sensor_core::clock::registers::{self, CLOCK_HALT, TIME_REGISTER_COUNT};
use sensor_core::clock::{DateTime, RtcBus};
use sensor_core::cycle::{
    CycleWork, NetworkTimeText, ScanEvent, ScanEventProducer, ScanSource, UploadReport,
};
use sensor_core::power::{PowerHal, ResetReason, RetainedPowerState, WakeupCause, WakeupPin};
use sensor_core::sequences::{RAIL_COUNT, Rail};
use sensor_core::{Fault, HardwareFault};

const SECONDS_PER_DAY: u64 = 86_400;
const MICROS_PER_SECOND: u64 = 1_000_000;
const MICROS_PER_HOUR: f64 = 3_600_000_000.0;

/// Size of the DS1307 register file: time, control and 56 bytes of RAM.
const REGISTER_FILE_LEN: usize = 64;

/// Crystal error the simulated RTC accepts, in parts per million.
pub const MAX_DRIFT_PPM: i32 = 500_000;

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

fn narrow(value: u64) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

/// Simulated time in microseconds, shared by every stand-in.
#[derive(Clone, Debug, Default)]
pub struct VirtualClock(Rc<Cell<u64>>);

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_us(&self) -> u64 {
        self.0.get()
    }

    pub fn advance(&self, duration: Duration) {
        self.0.set(self.0.get().saturating_add(micros(duration)));
    }

    fn advance_to(&self, at_us: u64) {
        if at_us > self.0.get() {
            self.0.set(at_us);
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.now_us())
    }
}

const fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

const fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// `time` moved forward by `seconds` with full calendar carry.
pub fn add_seconds(time: DateTime, seconds: u64) -> DateTime {
    let of_day = u64::from(time.hour) * 3_600
        + u64::from(time.minute) * 60
        + u64::from(time.second)
        + seconds;
    let mut days = of_day / SECONDS_PER_DAY;
    let rest = of_day % SECONDS_PER_DAY;

    let (mut year, mut month, mut day) = (time.year, time.month, time.day);
    while days > 0 {
        let left_in_month = u64::from(days_in_month(year, month).saturating_sub(day));
        if days <= left_in_month {
            day += narrow(days);
            days = 0;
        } else {
            days -= left_in_month + 1;
            day = 1;
            if month == 12 {
                month = 1;
                year = year.saturating_add(1);
            } else {
                month += 1;
            }
        }
    }

    DateTime::new(
        year,
        month,
        day,
        narrow(rest / 3_600),
        narrow(rest % 3_600 / 60),
        narrow(rest % 60),
    )
}

/// Modem-style `"yy/MM/dd,hh:mm:ss+zz"` rendering of a UTC time.
pub fn cellular_text(time: &DateTime) -> NetworkTimeText {
    let mut text = NetworkTimeText::new();
    // 24 characters always fit the 32-byte buffer.
    let _ = write!(
        text,
        "\"{:02}/{:02}/{:02},{:02}:{:02}:{:02}+00\"",
        time.year % 100,
        time.month,
        time.day,
        time.hour,
        time.minute,
        time.second
    );
    text
}

struct ChipState {
    clock: VirtualClock,
    base: DateTime,
    base_us: u64,
    running: bool,
    drift_ppm: i32,
    file: [u8; REGISTER_FILE_LEN],
    failing: bool,
}

impl ChipState {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn time(&self) -> DateTime {
        if !self.running {
            return self.base;
        }
        let elapsed = i128::from(self.clock.now_us().saturating_sub(self.base_us));
        let rate = i128::from(1_000_000 + self.drift_ppm);
        let ticked = (elapsed * rate / 1_000_000).max(0) as u64;
        add_seconds(self.base, ticked / MICROS_PER_SECOND)
    }

    fn image(&self) -> [u8; REGISTER_FILE_LEN] {
        let mut image = self.file;
        image[..TIME_REGISTER_COUNT].copy_from_slice(&registers::encode_time(&self.time()));
        if !self.running {
            image[usize::from(registers::SECONDS)] |= CLOCK_HALT;
        }
        image
    }

    fn window(start: u8, len: usize) -> Result<Range<usize>, HardwareFault> {
        let start = usize::from(start);
        let end = start + len;
        if end > REGISTER_FILE_LEN {
            return Err(HardwareFault::Bus);
        }
        Ok(start..end)
    }
}

/// DS1307 register file whose time advances with the virtual clock.
///
/// Writes that touch the time registers re-latch the base time, and the
/// clock-halt bit stops the oscillator just as on the real chip.
#[derive(Clone)]
pub struct SimulatedChip(Rc<RefCell<ChipState>>);

impl SimulatedChip {
    /// Chip with a running oscillator showing `time`.
    pub fn running(clock: VirtualClock, time: DateTime) -> Self {
        let base_us = clock.now_us();
        Self(Rc::new(RefCell::new(ChipState {
            clock,
            base: time,
            base_us,
            running: true,
            drift_ppm: 0,
            file: [0_u8; REGISTER_FILE_LEN],
            failing: false,
        })))
    }

    /// Chip fresh from the factory: halted on the unset date.
    pub fn halted(clock: VirtualClock) -> Self {
        let chip = Self::running(clock, DateTime::UNSET);
        chip.0.borrow_mut().running = false;
        chip
    }

    pub fn time(&self) -> DateTime {
        self.0.borrow().time()
    }

    pub fn is_running(&self) -> bool {
        self.0.borrow().running
    }

    pub fn drift_ppm(&self) -> i32 {
        self.0.borrow().drift_ppm
    }

    /// Changes the crystal error without disturbing the time shown now.
    pub fn set_drift_ppm(&self, ppm: i32) {
        let mut state = self.0.borrow_mut();
        state.base = state.time();
        state.base_us = state.clock.now_us();
        state.drift_ppm = ppm.clamp(-MAX_DRIFT_PPM, MAX_DRIFT_PPM);
    }

    pub fn set_failing(&self, failing: bool) {
        self.0.borrow_mut().failing = failing;
    }
}

impl RtcBus for SimulatedChip {
    fn read_registers(&mut self, start: u8, buffer: &mut [u8]) -> Result<(), HardwareFault> {
        let state = self.0.borrow();
        if state.failing {
            return Err(HardwareFault::Bus);
        }
        let window = ChipState::window(start, buffer.len())?;
        buffer.copy_from_slice(&state.image()[window]);
        Ok(())
    }

    fn write_registers(&mut self, start: u8, data: &[u8]) -> Result<(), HardwareFault> {
        let mut state = self.0.borrow_mut();
        if state.failing {
            return Err(HardwareFault::Bus);
        }
        let window = ChipState::window(start, data.len())?;
        let mut image = state.image();
        image[window.clone()].copy_from_slice(data);

        if window.start < TIME_REGISTER_COUNT {
            let mut time = [0_u8; TIME_REGISTER_COUNT];
            time.copy_from_slice(&image[..TIME_REGISTER_COUNT]);
            state.running = time[usize::from(registers::SECONDS)] & CLOCK_HALT == 0;
            state.base = registers::decode_time(&time);
            state.base_us = state.clock.now_us();
        }
        state.file[TIME_REGISTER_COUNT..].copy_from_slice(&image[TIME_REGISTER_COUNT..]);
        Ok(())
    }
}

struct GaugeState {
    clock: VirtualClock,
    charge_percent: f64,
    charge_at_us: u64,
    drain_per_hour: f64,
    cell_temperature_c: i16,
    failing: bool,
}

impl GaugeState {
    #[allow(clippy::cast_precision_loss)]
    fn charge(&self) -> f64 {
        let hours = self.clock.now_us().saturating_sub(self.charge_at_us) as f64 / MICROS_PER_HOUR;
        (self.charge_percent - self.drain_per_hour * hours).clamp(0.0, 100.0)
    }

    fn rebase(&mut self) {
        self.charge_percent = self.charge();
        self.charge_at_us = self.clock.now_us();
    }
}

/// Fuel gauge that loses a fixed share of charge per simulated hour.
#[derive(Clone)]
pub struct SimulatedGauge(Rc<RefCell<GaugeState>>);

impl SimulatedGauge {
    pub fn new(clock: VirtualClock, charge_percent: f64, drain_per_hour: f64) -> Self {
        let charge_at_us = clock.now_us();
        Self(Rc::new(RefCell::new(GaugeState {
            clock,
            charge_percent: charge_percent.clamp(0.0, 100.0),
            charge_at_us,
            drain_per_hour: drain_per_hour.max(0.0),
            cell_temperature_c: 20,
            failing: false,
        })))
    }

    pub fn charge(&self) -> f64 {
        self.0.borrow().charge()
    }

    pub fn set_charge(&self, percent: f64) {
        let mut state = self.0.borrow_mut();
        state.charge_percent = percent.clamp(0.0, 100.0);
        state.charge_at_us = state.clock.now_us();
    }

    pub fn set_drain(&self, per_hour: f64) {
        let mut state = self.0.borrow_mut();
        state.rebase();
        state.drain_per_hour = per_hour.max(0.0);
    }

    pub fn set_temperature(&self, celsius: i16) {
        self.0.borrow_mut().cell_temperature_c = celsius;
    }

    pub fn set_failing(&self, failing: bool) {
        self.0.borrow_mut().failing = failing;
    }
}

impl FuelGauge for SimulatedGauge {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn read_status(&mut self) -> Result<BatteryStatus, HardwareFault> {
        let state = self.0.borrow();
        if state.failing {
            return Err(HardwareFault::FuelGauge);
        }
        let charge = state.charge();
        let time_to_empty_min = if state.drain_per_hour > 0.0 {
            (charge / state.drain_per_hour * 60.0).min(f64::from(u16::MAX)) as u16
        } else {
            u16::MAX
        };
        Ok(BatteryStatus {
            // Linear 3.3 V to 4.2 V across the charge range.
            voltage_mv: 3_300 + (charge * 9.0) as u16,
            current_ma: -85,
            state_of_charge: charge.round() as u8,
            state_of_health: 96,
            cell_temperature_c: state.cell_temperature_c,
            board_temperature_c: state.cell_temperature_c.saturating_add(3),
            cycle_count: 41,
            time_to_empty_min,
        })
    }
}

/// Board model behind the power controller.
///
/// Deep sleep returns once the earliest armed wakeup fires. With no source
/// armed the board is parked until [`SimulatedHal::reboot`].
pub struct SimulatedHal {
    clock: VirtualClock,
    boot_us: u64,
    rails: [bool; RAIL_COUNT],
    held: [bool; RAIL_COUNT],
    watchdog: Option<Duration>,
    timer_wakeup: Option<Duration>,
    pin_wakeup: Option<WakeupPin>,
    retained: Option<RetainedPowerState>,
    reset: ResetReason,
    cause: WakeupCause,
    button_at_us: Option<u64>,
    parked: bool,
}

impl SimulatedHal {
    pub fn new(clock: VirtualClock) -> Self {
        let boot_us = clock.now_us();
        Self {
            clock,
            boot_us,
            rails: [false; RAIL_COUNT],
            held: [false; RAIL_COUNT],
            watchdog: None,
            timer_wakeup: None,
            pin_wakeup: None,
            retained: None,
            reset: ResetReason::PowerOn,
            cause: WakeupCause::Undefined,
            button_at_us: None,
            parked: false,
        }
    }

    /// Starts a new boot. Only a deep-sleep reset keeps retained memory and
    /// the wakeup cause; latched rails stay latched either way.
    pub fn reboot(&mut self, reason: ResetReason) {
        self.reset = reason;
        self.boot_us = self.clock.now_us();
        self.parked = false;
        self.watchdog = None;
        self.timer_wakeup = None;
        self.pin_wakeup = None;
        for (rail, held) in self.rails.iter_mut().zip(self.held) {
            *rail = *rail && held;
        }
        if reason != ResetReason::DeepSleep {
            self.retained = None;
            self.cause = WakeupCause::Undefined;
        }
    }

    /// Schedules a press of the wake button `after` from now.
    pub fn press_button_in(&mut self, after: Duration) {
        self.button_at_us = Some(self.clock.now_us().saturating_add(micros(after)));
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }

    pub fn rails(&self) -> [bool; RAIL_COUNT] {
        self.rails
    }

    pub fn watchdog_timeout(&self) -> Option<Duration> {
        self.watchdog
    }

    fn button_due_by(&self, deadline_us: u64) -> Option<u64> {
        self.pin_wakeup?;
        let now = self.clock.now_us();
        self.button_at_us
            .map(|at| at.max(now))
            .filter(|at| *at <= deadline_us)
    }
}

impl PowerHal for SimulatedHal {
    fn monotonic_micros(&self) -> u64 {
        self.clock.now_us().saturating_sub(self.boot_us)
    }

    fn drive_rail(&mut self, rail: Rail, enabled: bool) -> Result<(), HardwareFault> {
        self.rails[rail.as_index()] = enabled;
        Ok(())
    }

    fn rail_enabled(&self, rail: Rail) -> bool {
        self.rails[rail.as_index()]
    }

    fn settle(&mut self, duration: Duration) {
        self.clock.advance(duration);
    }

    fn hold_rail(&mut self, rail: Rail) -> Result<(), HardwareFault> {
        self.held[rail.as_index()] = true;
        Ok(())
    }

    fn release_holds(&mut self) -> Result<(), HardwareFault> {
        self.held = [false; RAIL_COUNT];
        Ok(())
    }

    fn arm_watchdog(&mut self, timeout: Duration) -> Result<(), HardwareFault> {
        self.watchdog = Some(timeout);
        Ok(())
    }

    fn feed_watchdog(&mut self) -> Result<(), HardwareFault> {
        if self.watchdog.is_some() {
            Ok(())
        } else {
            Err(HardwareFault::Watchdog)
        }
    }

    fn configure_timer_wakeup(&mut self, after: Duration) -> Result<(), HardwareFault> {
        self.timer_wakeup = Some(after);
        Ok(())
    }

    fn configure_pin_wakeup(&mut self, pin: WakeupPin) -> Result<(), HardwareFault> {
        self.pin_wakeup = Some(pin);
        Ok(())
    }

    fn clear_wakeup_sources(&mut self) {
        self.timer_wakeup = None;
        self.pin_wakeup = None;
    }

    fn deep_sleep(&mut self, _duration: Duration) {
        let now = self.clock.now_us();
        let timer_at = self
            .timer_wakeup
            .map(|after| now.saturating_add(micros(after)));
        let button_at = self.button_due_by(timer_at.unwrap_or(u64::MAX));

        // Outputs that were not latched drop while the core is off.
        for (rail, held) in self.rails.iter_mut().zip(self.held) {
            *rail = *rail && held;
        }

        let (wake_at, cause) = match (button_at, timer_at) {
            (Some(at), _) => (at, WakeupCause::External),
            (None, Some(at)) => (at, WakeupCause::Timer),
            (None, None) => {
                self.parked = true;
                return;
            }
        };
        if cause == WakeupCause::External {
            self.button_at_us = None;
        }
        self.clock.advance_to(wake_at);
        self.cause = cause;
    }

    fn light_sleep(&mut self, duration: Duration) -> WakeupCause {
        let deadline = self.clock.now_us().saturating_add(micros(duration));
        let cause = match self.button_due_by(deadline) {
            Some(at) => {
                self.button_at_us = None;
                self.clock.advance_to(at);
                WakeupCause::External
            }
            None => {
                self.clock.advance_to(deadline);
                WakeupCause::Timer
            }
        };
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
        self.retained = Some(*state);
        Ok(())
    }

    fn load_retained(&mut self) -> Option<RetainedPowerState> {
        self.retained
    }
}

/// Radios and storage: deterministic sightings and a modem that reports the
/// true time on every upload.
pub struct SimulatedWork {
    clock: VirtualClock,
    true_start: DateTime,
    seed: u64,
    pub wifi_per_scan: u8,
    pub ble_per_scan: u8,
    pub modem_online: bool,
    stored: Vec<ScanEvent>,
    uploaded: usize,
    scans: u32,
}

impl SimulatedWork {
    pub fn new(clock: VirtualClock, true_start: DateTime) -> Self {
        Self {
            clock,
            true_start,
            seed: 0x5EED_CAFE,
            wifi_per_scan: 6,
            ble_per_scan: 4,
            modem_online: true,
            stored: Vec::new(),
            uploaded: 0,
            scans: 0,
        }
    }

    /// Wall-clock time the network would report now.
    pub fn true_time(&self) -> DateTime {
        add_seconds(self.true_start, self.clock.elapsed().as_secs())
    }

    pub fn stored(&self) -> usize {
        self.stored.len()
    }

    pub fn uploaded(&self) -> usize {
        self.uploaded
    }

    pub fn scans(&self) -> u32 {
        self.scans
    }

    fn next_random(&mut self) -> u64 {
        // Knuth's MMIX constants.
        self.seed = self
            .seed
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.seed >> 16
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn sighting(&mut self, source: ScanSource) -> ScanEvent {
        let bits = self.next_random();
        let mut address = [0x02, 0, 0, 0, 0, 0];
        for (index, byte) in address.iter_mut().enumerate().skip(1) {
            *byte = (bits >> (index * 8)) as u8;
        }
        ScanEvent {
            source,
            address,
            rssi: -40 - (bits % 50) as i8,
            channel: match source {
                ScanSource::Wifi => 1 + (bits % 11) as u8,
                ScanSource::Ble => 0,
            },
        }
    }
}

impl CycleWork for SimulatedWork {
    fn scan<P: ScanEventProducer>(&mut self, events: &mut P) -> Result<(), Fault> {
        self.scans += 1;
        let wifi = (0..self.wifi_per_scan).map(|_| ScanSource::Wifi);
        let ble = (0..self.ble_per_scan).map(|_| ScanSource::Ble);
        for source in wifi.chain(ble) {
            let event = self.sighting(source);
            // Overflow is counted by the queue.
            let _ = events.try_enqueue(event);
        }
        Ok(())
    }

    fn record(&mut self, event: &ScanEvent) {
        self.stored.push(*event);
    }

    fn upload(&mut self) -> Result<UploadReport, Fault> {
        if !self.modem_online {
            return Ok(UploadReport::default());
        }
        self.uploaded += self.stored.len();
        self.stored.clear();
        Ok(UploadReport {
            delivered: true,
            network_time: Some(cellular_text(&self.true_time())),
        })
    }
}
