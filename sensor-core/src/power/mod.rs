//! Power sequencing: rail state, sleep transitions, battery policy and
//! duty-cycle accounting.

use core::ops::BitOr;
use core::time::Duration;

use crate::error::ValidationFault;
use crate::sequences::Rail;

pub mod controller;
pub mod hal;

pub use controller::PowerController;
pub use hal::PowerHal;

/// Shortest sleep the controller will request.
pub const DEFAULT_MIN_SLEEP: Duration = Duration::from_secs(1);
/// Longest sleep the controller will request.
pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_secs(3_600);
/// Battery percentage at or below which radios are shed.
pub const DEFAULT_LOW_BATTERY_PERCENT: f32 = 15.0;
/// Battery percentage at or below which the device enters emergency mode.
pub const DEFAULT_CRITICAL_BATTERY_PERCENT: f32 = 5.0;
/// Watchdog timeout armed at boot.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(300);
/// Single long sleep taken in emergency mode.
pub const EMERGENCY_SLEEP: Duration = Duration::from_secs(3_600);
/// "Sleep until intervention": the largest duration a timer can express.
pub const SLEEP_UNTIL_INTERVENTION: Duration = Duration::from_micros(u64::MAX);

/// External pin that may wake the device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WakeupPin {
    pub pin: u8,
    /// Level (`true` = high) that triggers the wake.
    pub level: bool,
}

/// Power policy configuration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PowerConfig {
    pub min_sleep: Duration,
    pub max_sleep: Duration,
    pub low_battery_percent: f32,
    pub critical_battery_percent: f32,
    pub emergency_shutdown_enabled: bool,
    /// `Duration::ZERO` leaves the watchdog disarmed.
    pub watchdog_timeout: Duration,
    pub wakeup_pin: Option<WakeupPin>,
}

impl PowerConfig {
    pub const DEFAULT: Self = Self {
        min_sleep: DEFAULT_MIN_SLEEP,
        max_sleep: DEFAULT_MAX_SLEEP,
        low_battery_percent: DEFAULT_LOW_BATTERY_PERCENT,
        critical_battery_percent: DEFAULT_CRITICAL_BATTERY_PERCENT,
        emergency_shutdown_enabled: true,
        watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
        wakeup_pin: None,
    };

    /// Rejects inverted sleep bounds and inverted or out-of-range thresholds.
    pub fn validate(&self) -> Result<(), ValidationFault> {
        if self.min_sleep > self.max_sleep {
            return Err(ValidationFault::SleepBounds);
        }
        let critical = self.critical_battery_percent;
        let low = self.low_battery_percent;
        if !(0.0..=100.0).contains(&critical) || !(0.0..=100.0).contains(&low) || critical > low
        {
            return Err(ValidationFault::BatteryThresholds);
        }
        Ok(())
    }

    /// Clamps `requested` into `[min_sleep, max_sleep]`.
    #[must_use]
    pub fn clamp_sleep(&self, requested: Duration) -> Duration {
        requested.clamp(self.min_sleep, self.max_sleep)
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Logical power flags for every peripheral.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct PeripheralConfig {
    pub wifi: bool,
    pub bluetooth: bool,
    pub cellular: bool,
    pub sdcard: bool,
    pub sensors: bool,
    pub external_5v: bool,
    pub rtc: bool,
    pub watchdog: bool,
}

impl PeripheralConfig {
    /// Boot state: everything off except the RTC and the watchdog.
    pub const BOOT: Self = Self {
        wifi: false,
        bluetooth: false,
        cellular: false,
        sdcard: false,
        sensors: false,
        external_5v: false,
        rtc: true,
        watchdog: true,
    };

    /// Everything a scan/upload cycle needs.
    pub const ACTIVE: Self = Self {
        wifi: true,
        bluetooth: true,
        cellular: true,
        sdcard: true,
        sensors: true,
        external_5v: true,
        rtc: true,
        watchdog: true,
    };

    #[must_use]
    pub const fn rail(&self, rail: Rail) -> bool {
        match rail {
            Rail::External5V => self.external_5v,
            Rail::Wifi => self.wifi,
            Rail::Bluetooth => self.bluetooth,
            Rail::Cellular => self.cellular,
            Rail::SdCard => self.sdcard,
            Rail::Sensors => self.sensors,
        }
    }

    pub fn set_rail(&mut self, rail: Rail, enabled: bool) {
        match rail {
            Rail::External5V => self.external_5v = enabled,
            Rail::Wifi => self.wifi = enabled,
            Rail::Bluetooth => self.bluetooth = enabled,
            Rail::Cellular => self.cellular = enabled,
            Rail::SdCard => self.sdcard = enabled,
            Rail::Sensors => self.sensors = enabled,
        }
    }

    /// Same request with every 5V-fed peripheral forced off when 5V is off.
    #[must_use]
    pub const fn normalized(self) -> Self {
        if self.external_5v {
            self
        } else {
            Self {
                cellular: false,
                sdcard: false,
                sensors: false,
                ..self
            }
        }
    }

    /// `true` when no peripheral is reported on while its supply is off.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.external_5v || !(self.cellular || self.sdcard || self.sensors)
    }
}

/// Sleep flavour.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SleepMode {
    Light,
    Deep,
}

impl SleepMode {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            SleepMode::Light => "light",
            SleepMode::Deep => "deep",
        }
    }
}

/// Why the processor woke up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WakeupCause {
    /// Not a wake from sleep (cold boot or reset).
    Undefined,
    Timer,
    External,
    Unknown,
}

impl WakeupCause {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            WakeupCause::Undefined => "undefined",
            WakeupCause::Timer => "timer",
            WakeupCause::External => "external",
            WakeupCause::Unknown => "unknown",
        }
    }
}

/// Reason for the last processor reset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResetReason {
    PowerOn,
    External,
    Software,
    Panic,
    InterruptWatchdog,
    TaskWatchdog,
    OtherWatchdog,
    DeepSleep,
    Brownout,
    Sdio,
    Unknown,
}

impl ResetReason {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ResetReason::PowerOn => "power-on",
            ResetReason::External => "external",
            ResetReason::Software => "software",
            ResetReason::Panic => "panic",
            ResetReason::InterruptWatchdog => "interrupt-watchdog",
            ResetReason::TaskWatchdog => "task-watchdog",
            ResetReason::OtherWatchdog => "other-watchdog",
            ResetReason::DeepSleep => "deep-sleep",
            ResetReason::Brownout => "brownout",
            ResetReason::Sdio => "sdio",
            ResetReason::Unknown => "unknown",
        }
    }
}

/// Bit set of wakeup sources to arm before sleeping.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WakeupSources(u8);

impl WakeupSources {
    pub const NONE: Self = Self(0);
    pub const TIMER: Self = Self(0x01);
    pub const EXT0: Self = Self(0x02);
    pub const EXT1: Self = Self(0x04);
    pub const TOUCHPAD: Self = Self(0x08);
    pub const ULP: Self = Self(0x10);

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x1F)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Either external pin source is requested.
    #[must_use]
    pub const fn wants_external(self) -> bool {
        self.0 & (Self::EXT0.0 | Self::EXT1.0) != 0
    }
}

impl BitOr for WakeupSources {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Counters that must survive a deep-sleep power cycle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RetainedPowerState {
    pub total_active_us: u64,
    pub total_sleep_us: u64,
    pub sleep_cycles: u32,
    pub wakeup_events: u32,
    /// Sleep requested right before the power cycle, cleared on resume.
    pub pending_sleep_us: Option<u64>,
}

/// Live controller state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PowerState {
    pub peripherals: PeripheralConfig,
    pub emergency_mode: bool,
    pub total_active_us: u64,
    pub total_sleep_us: u64,
    pub sleep_cycles: u32,
    pub wakeup_events: u32,
    pub last_reset_reason: ResetReason,
    pub last_wakeup_cause: WakeupCause,
    pub boot_timestamp_us: u64,
}

impl PowerState {
    pub const BOOT: Self = Self {
        peripherals: PeripheralConfig::BOOT,
        emergency_mode: false,
        total_active_us: 0,
        total_sleep_us: 0,
        sleep_cycles: 0,
        wakeup_events: 0,
        last_reset_reason: ResetReason::Unknown,
        last_wakeup_cause: WakeupCause::Undefined,
        boot_timestamp_us: 0,
    };

    pub(crate) const fn retained(&self, pending_sleep_us: Option<u64>) -> RetainedPowerState {
        RetainedPowerState {
            total_active_us: self.total_active_us,
            total_sleep_us: self.total_sleep_us,
            sleep_cycles: self.sleep_cycles,
            wakeup_events: self.wakeup_events,
            pending_sleep_us,
        }
    }
}

/// Derived statistics; computed on every call.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PowerStats {
    pub total_sleep: Duration,
    pub total_active: Duration,
    pub sleep_cycles: u32,
    pub wakeup_events: u32,
    pub average_sleep_seconds: f32,
    pub duty_cycle_percent: f32,
    pub last_wakeup_cause: WakeupCause,
    pub last_reset_reason: ResetReason,
    pub boot_timestamp_us: u64,
}

/// Active share of total time in percent, zero when nothing was measured.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn duty_cycle_percent(active_us: u64, sleep_us: u64) -> f32 {
    let total = active_us.saturating_add(sleep_us);
    if total == 0 {
        return 0.0;
    }
    (active_us as f64 * 100.0 / total as f64) as f32
}

/// Mean sleep per cycle in seconds, zero before the first cycle.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn average_sleep_seconds(total_sleep_us: u64, sleep_cycles: u32) -> f32 {
    if sleep_cycles == 0 {
        return 0.0;
    }
    (total_sleep_us as f64 / f64::from(sleep_cycles) / 1_000_000.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(actual: f32, expected: f32) -> bool {
        actual > expected - 1e-4 && actual < expected + 1e-4
    }

    #[test]
    fn duty_cycle_guards_zero_denominator() {
        assert!(approx(duty_cycle_percent(100, 900), 10.0));
        assert!(approx(duty_cycle_percent(0, 0), 0.0));
        assert!(approx(duty_cycle_percent(5, 0), 100.0));
    }

    #[test]
    fn average_sleep_guards_zero_cycles() {
        assert!(approx(average_sleep_seconds(10_000_000, 0), 0.0));
        assert!(approx(average_sleep_seconds(10_000_000, 4), 2.5));
    }

    #[test]
    fn sleep_bounds_clamp_both_sides() {
        let config = PowerConfig::DEFAULT;
        assert_eq!(config.clamp_sleep(Duration::from_millis(10)), DEFAULT_MIN_SLEEP);
        assert_eq!(config.clamp_sleep(Duration::from_secs(7_200)), DEFAULT_MAX_SLEEP);
        assert_eq!(
            config.clamp_sleep(Duration::from_secs(90)),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn config_validation_rejects_inverted_values() {
        assert_eq!(PowerConfig::DEFAULT.validate(), Ok(()));

        let inverted_sleep = PowerConfig {
            min_sleep: Duration::from_secs(10),
            max_sleep: Duration::from_secs(5),
            ..PowerConfig::DEFAULT
        };
        assert_eq!(inverted_sleep.validate(), Err(ValidationFault::SleepBounds));

        let inverted_thresholds = PowerConfig {
            low_battery_percent: 4.0,
            critical_battery_percent: 5.0,
            ..PowerConfig::DEFAULT
        };
        assert_eq!(
            inverted_thresholds.validate(),
            Err(ValidationFault::BatteryThresholds)
        );
    }

    #[test]
    fn normalization_enforces_supply_dependency() {
        let request = PeripheralConfig {
            external_5v: false,
            ..PeripheralConfig::ACTIVE
        };
        assert!(!request.is_consistent());
        let normalized = request.normalized();
        assert!(normalized.is_consistent());
        assert!(normalized.wifi && normalized.bluetooth);
        assert!(!normalized.cellular && !normalized.sdcard && !normalized.sensors);
        assert!(normalized.rtc && normalized.watchdog);
    }

    #[test]
    fn wakeup_source_mask() {
        let mask = WakeupSources::TIMER | WakeupSources::EXT0;
        assert!(mask.contains(WakeupSources::TIMER));
        assert!(mask.wants_external());
        assert!(!WakeupSources::TIMER.wants_external());
        assert!(!mask.contains(WakeupSources::NONE));
        assert_eq!(WakeupSources::from_bits(0xFF).bits(), 0x1F);
    }
}
