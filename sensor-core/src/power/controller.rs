//! The power sequencing controller.
//!
//! Owns [`PowerState`] and is the only code that changes it. Calls take
//! `&mut self`; the owner serialises access (the firmware keeps the
//! controller inside its single cycle task).
//!
//! Deep sleep is a power-cycle boundary. On hardware the HAL's deep-sleep
//! primitive never returns and the resume bookkeeping runs from
//! [`PowerController::initialize`] after the reset, using the counters that
//! were stored through [`PowerHal::store_retained`]. Simulated platforms
//! return from the primitive and the same bookkeeping runs in place.

use core::time::Duration;

use super::hal::PowerHal;
use super::{
    EMERGENCY_SLEEP, PeripheralConfig, PowerConfig, PowerState, PowerStats, ResetReason,
    SLEEP_UNTIL_INTERVENTION, SleepMode, WakeupCause, WakeupSources, average_sleep_seconds,
    duty_cycle_percent,
};
use crate::error::{Fault, HardwareFault};
use crate::sequences::{POWER_DOWN_TEMPLATE, POWER_UP_TEMPLATE, Rail};
use crate::telemetry::{Component, Severity, TelemetryEvent, TelemetrySink};

/// Reason recorded when the battery policy forces emergency mode.
pub const CRITICAL_BATTERY_REASON: &str = "critical battery level";

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

pub struct PowerController<H, T> {
    hal: H,
    telemetry: T,
    config: PowerConfig,
    active_profile: PeripheralConfig,
    state: PowerState,
    last_wake_us: u64,
    initialized: bool,
    radios_shed: bool,
    emergency_reason: Option<&'static str>,
}

impl<H, T> PowerController<H, T>
where
    H: PowerHal,
    T: TelemetrySink,
{
    pub const fn new(hal: H, config: PowerConfig, telemetry: T) -> Self {
        Self {
            hal,
            telemetry,
            config,
            active_profile: PeripheralConfig::ACTIVE,
            state: PowerState::BOOT,
            last_wake_us: 0,
            initialized: false,
            radios_shed: false,
            emergency_reason: None,
        }
    }

    fn log(&mut self, severity: Severity, event: TelemetryEvent) {
        self.telemetry.emit(severity, Component::Power, event);
    }

    fn warn_on(&mut self, result: Result<(), HardwareFault>) {
        if let Err(fault) = result {
            self.log(Severity::Warning, TelemetryEvent::HardwareWarning(fault));
        }
    }

    fn ensure_initialized(&self) -> Result<(), Fault> {
        if self.initialized {
            Ok(())
        } else {
            Err(Fault::NotInitialized)
        }
    }

    /// Brings the platform into its boot state: holds released, every rail
    /// off, watchdog armed. After a deep-sleep reset the retained counters
    /// are restored and the pending sleep is accounted.
    pub fn initialize(&mut self) -> Result<(), Fault> {
        let now = self.hal.monotonic_micros();
        self.state = PowerState {
            boot_timestamp_us: now,
            ..PowerState::BOOT
        };
        self.last_wake_us = now;
        self.radios_shed = false;
        self.emergency_reason = None;

        let gpio = |_| Fault::Hardware(HardwareFault::GpioConfig);
        if let Err(fault) = self.hal.release_holds().map_err(gpio) {
            self.log(Severity::Error, TelemetryEvent::Faulted(fault));
            return Err(fault);
        }
        for step in POWER_DOWN_TEMPLATE.steps() {
            if let Err(fault) = self.hal.drive_rail(step.rail, false).map_err(gpio) {
                self.log(Severity::Error, TelemetryEvent::Faulted(fault));
                return Err(fault);
            }
        }

        let reason = self.hal.reset_reason();
        self.state.last_reset_reason = reason;
        if reason == ResetReason::DeepSleep {
            self.state.last_wakeup_cause = self.hal.wakeup_cause();
            if let Some(retained) = self.hal.load_retained() {
                self.state.total_active_us = retained.total_active_us;
                self.state.total_sleep_us = retained.total_sleep_us;
                self.state.sleep_cycles = retained.sleep_cycles;
                self.state.wakeup_events = retained.wakeup_events;
                if let Some(slept) = retained.pending_sleep_us {
                    // Only a bounded sleep has a known length to credit.
                    if slept <= micros(self.config.max_sleep) {
                        self.account_wake(slept);
                    }
                    let retained = self.state.retained(None);
                    let stored = self.hal.store_retained(&retained);
                    self.warn_on(stored);
                }
            }
        }

        if !self.config.watchdog_timeout.is_zero() {
            let timeout = self.config.watchdog_timeout;
            if let Err(fault) = self.hal.arm_watchdog(timeout) {
                let fault = Fault::Hardware(fault);
                self.log(Severity::Error, TelemetryEvent::Faulted(fault));
                return Err(fault);
            }
        }

        self.initialized = true;
        Ok(())
    }

    /// Replaces the policy configuration wholesale.
    pub fn set_power_config(&mut self, config: PowerConfig) -> Result<(), Fault> {
        if let Err(fault) = config.validate() {
            self.log(Severity::Warning, TelemetryEvent::ConfigRejected(fault));
            return Err(fault.into());
        }
        self.config = config;
        Ok(())
    }

    /// Peripherals brought up by [`Self::enable_peripherals`].
    pub fn set_active_profile(&mut self, profile: PeripheralConfig) {
        self.active_profile = profile.normalized();
    }

    fn switch_rail(&mut self, rail: Rail, enabled: bool) -> Result<(), Fault> {
        if let Err(fault) = self.hal.drive_rail(rail, enabled) {
            let fault = Fault::Hardware(fault);
            self.log(Severity::Error, TelemetryEvent::Faulted(fault));
            return Err(fault);
        }
        self.state.peripherals.set_rail(rail, enabled);
        self.log(Severity::Info, TelemetryEvent::RailSwitched { rail, enabled });
        Ok(())
    }

    fn power_up_to(&mut self, target: PeripheralConfig) -> Result<(), Fault> {
        for step in POWER_UP_TEMPLATE.steps() {
            let rail = step.rail;
            if !target.rail(rail) || self.state.peripherals.rail(rail) {
                continue;
            }
            if rail.needs_external_5v() && !self.state.peripherals.external_5v {
                continue;
            }
            self.switch_rail(rail, true)?;
            if !step.settle.is_zero() {
                self.log(
                    Severity::Debug,
                    TelemetryEvent::RailSettling {
                        rail,
                        settle: step.settle,
                    },
                );
                self.hal.settle(step.settle);
            }
        }
        Ok(())
    }

    fn power_down_to(&mut self, target: PeripheralConfig) -> Result<(), Fault> {
        for step in POWER_DOWN_TEMPLATE.steps() {
            let rail = step.rail;
            if self.state.peripherals.rail(rail) && !target.rail(rail) {
                self.switch_rail(rail, false)?;
                if !step.settle.is_zero() {
                    self.hal.settle(step.settle);
                }
            }
        }
        Ok(())
    }

    /// Powers up the active profile: 5V first, settled, then the rest in
    /// order. Radios stay off while the battery policy has shed them.
    pub fn enable_peripherals(&mut self) -> Result<(), Fault> {
        self.ensure_initialized()?;
        let mut profile = self.active_profile;
        if self.radios_shed {
            profile.wifi = false;
            profile.bluetooth = false;
        }
        self.power_up_to(profile)
    }

    /// Powers every rail down in reverse order, 5V last.
    pub fn disable_peripherals(&mut self) -> Result<(), Fault> {
        self.ensure_initialized()?;
        let target = PeripheralConfig {
            rtc: self.state.peripherals.rtc,
            watchdog: self.state.peripherals.watchdog,
            ..PeripheralConfig::BOOT
        };
        self.power_down_to(target)
    }

    /// Moves to `config`, switching only rails whose state differs. Rails
    /// that depend on 5V are dropped from the request when 5V is off.
    pub fn configure_peripherals(&mut self, config: PeripheralConfig) -> Result<(), Fault> {
        self.ensure_initialized()?;
        let target = config.normalized();
        self.power_down_to(target)?;
        self.power_up_to(target)?;
        self.state.peripherals.rtc = target.rtc;
        self.state.peripherals.watchdog = target.watchdog;
        Ok(())
    }

    fn clamp(&mut self, requested: Duration) -> Duration {
        let applied = self.config.clamp_sleep(requested);
        if applied != requested {
            self.log(
                Severity::Warning,
                TelemetryEvent::SleepClamped { requested, applied },
            );
        }
        applied
    }

    fn account_active(&mut self) {
        let now = self.hal.monotonic_micros();
        let delta = now.saturating_sub(self.last_wake_us);
        self.state.total_active_us = self.state.total_active_us.saturating_add(delta);
    }

    fn account_wake(&mut self, slept_us: u64) {
        self.last_wake_us = self.hal.monotonic_micros();
        self.state.total_sleep_us = self.state.total_sleep_us.saturating_add(slept_us);
        self.state.wakeup_events = self.state.wakeup_events.saturating_add(1);
        self.state.sleep_cycles = self.state.sleep_cycles.saturating_add(1);
    }

    fn prepare_sleep(&mut self, mode: SleepMode) {
        let fed = self.hal.feed_watchdog();
        self.warn_on(fed);
        self.hal.clear_wakeup_sources();
        if mode == SleepMode::Deep && self.state.peripherals.external_5v {
            let held = self.hal.hold_rail(Rail::External5V);
            self.warn_on(held);
        }
    }

    fn configure_wakeup(&mut self, duration: Duration, sources: WakeupSources) {
        if sources.contains(WakeupSources::TIMER) {
            let armed = self.hal.configure_timer_wakeup(duration);
            self.warn_on(armed);
        }
        if sources.wants_external()
            && let Some(pin) = self.config.wakeup_pin
        {
            let armed = self.hal.configure_pin_wakeup(pin);
            self.warn_on(armed);
        }
    }

    fn restore_from_sleep(&mut self, mode: SleepMode) -> WakeupCause {
        if mode == SleepMode::Deep {
            let released = self.hal.release_holds();
            self.warn_on(released);
        }
        let fed = self.hal.feed_watchdog();
        self.warn_on(fed);
        let cause = self.hal.wakeup_cause();
        self.state.last_wakeup_cause = cause;
        cause
    }

    fn deep_sleep_unclamped(&mut self, duration: Duration, sources: WakeupSources) -> WakeupCause {
        self.account_active();
        self.prepare_sleep(SleepMode::Deep);
        self.configure_wakeup(duration, sources);

        // An open-ended sleep has no length to credit on resume.
        let pending = (duration != SLEEP_UNTIL_INTERVENTION).then(|| micros(duration));
        let retained = self.state.retained(pending);
        let stored = self.hal.store_retained(&retained);
        self.warn_on(stored);

        self.log(
            Severity::Info,
            TelemetryEvent::SleepEntered {
                mode: SleepMode::Deep,
                duration,
            },
        );
        let before = self.hal.monotonic_micros();
        self.hal.deep_sleep(duration);

        let slept = self.hal.monotonic_micros().saturating_sub(before);
        self.account_wake(slept);
        let cause = self.restore_from_sleep(SleepMode::Deep);
        let retained = self.state.retained(None);
        let stored = self.hal.store_retained(&retained);
        self.warn_on(stored);
        self.log(
            Severity::Info,
            TelemetryEvent::SleepResumed {
                mode: SleepMode::Deep,
                cause,
                slept: Duration::from_micros(slept),
            },
        );
        cause
    }

    /// Clamps `duration` into the configured bounds and deep-sleeps on the timer.
    pub fn enter_sleep(&mut self, duration: Duration) -> Result<WakeupCause, Fault> {
        self.enter_deep_sleep(duration, WakeupSources::TIMER)
    }

    /// Deep sleep with the requested wakeup sources.
    pub fn enter_deep_sleep(
        &mut self,
        duration: Duration,
        sources: WakeupSources,
    ) -> Result<WakeupCause, Fault> {
        self.ensure_initialized()?;
        let duration = self.clamp(duration);
        Ok(self.deep_sleep_unclamped(duration, sources))
    }

    /// Light sleep with peripherals left running. Returns `true` when the
    /// timer ended the sleep; `false` means the caller should re-evaluate.
    pub fn enter_light_sleep(&mut self, duration: Duration) -> Result<bool, Fault> {
        self.ensure_initialized()?;
        let duration = self.clamp(duration);
        self.account_active();
        self.prepare_sleep(SleepMode::Light);
        self.configure_wakeup(duration, WakeupSources::TIMER | WakeupSources::EXT0);

        self.log(
            Severity::Debug,
            TelemetryEvent::SleepEntered {
                mode: SleepMode::Light,
                duration,
            },
        );
        let before = self.hal.monotonic_micros();
        let reported = self.hal.light_sleep(duration);
        let slept = self.hal.monotonic_micros().saturating_sub(before);
        self.account_wake(slept);
        let cause = self.restore_from_sleep(SleepMode::Light);
        let completed = reported == WakeupCause::Timer && cause == WakeupCause::Timer;
        if !completed {
            self.log(
                Severity::Info,
                TelemetryEvent::LightSleepInterrupted { cause: reported },
            );
        }
        Ok(completed)
    }

    /// Battery policy. `false` means normal operation must not continue.
    /// Critical charge with emergency shutdown disabled runs on degraded,
    /// leaving the rails as they are.
    pub fn check_battery_level(&mut self, percent: f32) -> bool {
        if percent <= self.config.critical_battery_percent {
            let emergency_enabled = self.config.emergency_shutdown_enabled;
            self.log(
                Severity::Critical,
                TelemetryEvent::BatteryCritical {
                    percent,
                    emergency_enabled,
                },
            );
            if emergency_enabled {
                self.enter_emergency_mode(CRITICAL_BATTERY_REASON);
                return false;
            }
            return true;
        }

        self.radios_shed = percent <= self.config.low_battery_percent;
        if self.radios_shed {
            self.log(Severity::Warning, TelemetryEvent::BatteryLow { percent });
            let shed = PeripheralConfig {
                wifi: false,
                bluetooth: false,
                ..self.state.peripherals
            };
            if let Err(fault) = self.configure_peripherals(shed) {
                self.log(Severity::Warning, TelemetryEvent::Faulted(fault));
            }
        }
        true
    }

    /// One-way transition: everything but the RTC and watchdog off, then one
    /// long timer-only deep sleep.
    pub fn enter_emergency_mode(&mut self, reason: &'static str) {
        if self.state.emergency_mode {
            self.log(Severity::Warning, TelemetryEvent::EmergencyAlreadyActive);
            return;
        }
        self.state.emergency_mode = true;
        self.emergency_reason = Some(reason);
        self.log(
            Severity::Critical,
            TelemetryEvent::EmergencyEntered { reason },
        );

        let survivors = PeripheralConfig {
            rtc: true,
            watchdog: true,
            ..PeripheralConfig::BOOT
        };
        if self.initialized {
            if let Err(fault) = self.configure_peripherals(survivors) {
                self.log(Severity::Error, TelemetryEvent::Faulted(fault));
            }
        } else {
            self.force_rails_off();
        }
        let duration = self.clamp(EMERGENCY_SLEEP);
        self.deep_sleep_unclamped(duration, WakeupSources::TIMER);
    }

    fn force_rails_off(&mut self) {
        for step in POWER_DOWN_TEMPLATE.steps() {
            let driven = self.hal.drive_rail(step.rail, false);
            if driven.is_ok() {
                self.state.peripherals.set_rail(step.rail, false);
            }
            self.warn_on(driven);
        }
    }

    /// Powers down and sleeps until someone intervenes. The emergency variant
    /// skips orderly sequencing.
    pub fn shutdown(&mut self, emergency: bool) {
        self.log(
            Severity::Warning,
            TelemetryEvent::ShutdownRequested { emergency },
        );
        if emergency {
            self.state.emergency_mode = true;
            self.force_rails_off();
        } else if let Err(fault) = self.disable_peripherals() {
            self.log(Severity::Error, TelemetryEvent::Faulted(fault));
            self.force_rails_off();
        }
        let held = self.hal.hold_rail(Rail::External5V);
        self.warn_on(held);
        self.deep_sleep_unclamped(SLEEP_UNTIL_INTERVENTION, WakeupSources::NONE);
    }

    pub fn feed_watchdog(&mut self) -> Result<(), Fault> {
        self.hal.feed_watchdog().map_err(Fault::Hardware)
    }

    /// Supply matches what the controller believes and no emergency is active.
    pub fn perform_health_check(&mut self) -> bool {
        let supply_matches =
            self.hal.rail_enabled(Rail::External5V) == self.state.peripherals.external_5v;
        let healthy = self.initialized
            && supply_matches
            && self.state.peripherals.is_consistent()
            && !self.state.emergency_mode;
        self.log(
            if healthy {
                Severity::Debug
            } else {
                Severity::Warning
            },
            TelemetryEvent::HealthCheck { healthy },
        );
        healthy
    }

    /// Statistics derived from the accumulated counters, including the
    /// active span in progress.
    pub fn power_stats(&self) -> PowerStats {
        let running = self
            .hal
            .monotonic_micros()
            .saturating_sub(self.last_wake_us);
        let active = self.state.total_active_us.saturating_add(running);
        let sleep = self.state.total_sleep_us;
        PowerStats {
            total_sleep: Duration::from_micros(sleep),
            total_active: Duration::from_micros(active),
            sleep_cycles: self.state.sleep_cycles,
            wakeup_events: self.state.wakeup_events,
            average_sleep_seconds: average_sleep_seconds(sleep, self.state.sleep_cycles),
            duty_cycle_percent: duty_cycle_percent(active, sleep),
            last_wakeup_cause: self.state.last_wakeup_cause,
            last_reset_reason: self.state.last_reset_reason,
            boot_timestamp_us: self.state.boot_timestamp_us,
        }
    }

    pub fn wakeup_cause(&self) -> WakeupCause {
        self.state.last_wakeup_cause
    }

    pub fn state(&self) -> &PowerState {
        &self.state
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    pub fn peripheral_config(&self) -> PeripheralConfig {
        self.state.peripherals
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Low battery has switched the radios off until a better reading.
    pub fn radios_shed(&self) -> bool {
        self.radios_shed
    }

    pub fn is_emergency_mode(&self) -> bool {
        self.state.emergency_mode
    }

    pub fn emergency_reason(&self) -> Option<&'static str> {
        self.emergency_reason
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    /// Consumes the controller and hands back its platform and sink.
    pub fn release(self) -> (H, T) {
        (self.hal, self.telemetry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::{RetainedPowerState, WakeupPin};
    use crate::telemetry::TelemetryRing;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Call {
        Rail(Rail, bool),
        Settle(Duration),
        Hold(Rail),
        Release,
        Timer(Duration),
        Pin(u8),
        Deep(Duration),
        Light(Duration),
    }

    struct FakeHal {
        now_us: u64,
        rails: [bool; 6],
        calls: heapless::Vec<Call, 64>,
        retained: Option<RetainedPowerState>,
        stored: heapless::Vec<RetainedPowerState, 8>,
        reset: ResetReason,
        cause: WakeupCause,
        light_cause: WakeupCause,
        fail_watchdog_arm: bool,
        fail_watchdog_feed: bool,
    }

    impl FakeHal {
        fn new() -> Self {
            Self {
                now_us: 0,
                rails: [false; 6],
                calls: heapless::Vec::new(),
                retained: None,
                stored: heapless::Vec::new(),
                reset: ResetReason::PowerOn,
                cause: WakeupCause::Undefined,
                light_cause: WakeupCause::Timer,
                fail_watchdog_arm: false,
                fail_watchdog_feed: false,
            }
        }

        fn push(&mut self, call: Call) {
            let _ = self.calls.push(call);
        }

        fn sleeps(&self) -> heapless::Vec<Duration, 8> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Deep(duration) | Call::Light(duration) => Some(*duration),
                    _ => None,
                })
                .collect()
        }
    }

    impl PowerHal for FakeHal {
        fn monotonic_micros(&self) -> u64 {
            self.now_us
        }

        fn drive_rail(&mut self, rail: Rail, enabled: bool) -> Result<(), HardwareFault> {
            self.rails[rail.as_index()] = enabled;
            self.push(Call::Rail(rail, enabled));
            Ok(())
        }

        fn rail_enabled(&self, rail: Rail) -> bool {
            self.rails[rail.as_index()]
        }

        fn settle(&mut self, duration: Duration) {
            self.now_us += micros(duration);
            self.push(Call::Settle(duration));
        }

        fn hold_rail(&mut self, rail: Rail) -> Result<(), HardwareFault> {
            self.push(Call::Hold(rail));
            Ok(())
        }

        fn release_holds(&mut self) -> Result<(), HardwareFault> {
            self.push(Call::Release);
            Ok(())
        }

        fn arm_watchdog(&mut self, _timeout: Duration) -> Result<(), HardwareFault> {
            if self.fail_watchdog_arm {
                Err(HardwareFault::Watchdog)
            } else {
                Ok(())
            }
        }

        fn feed_watchdog(&mut self) -> Result<(), HardwareFault> {
            if self.fail_watchdog_feed {
                Err(HardwareFault::Watchdog)
            } else {
                Ok(())
            }
        }

        fn configure_timer_wakeup(&mut self, after: Duration) -> Result<(), HardwareFault> {
            self.push(Call::Timer(after));
            Ok(())
        }

        fn configure_pin_wakeup(&mut self, pin: WakeupPin) -> Result<(), HardwareFault> {
            self.push(Call::Pin(pin.pin));
            Ok(())
        }

        fn clear_wakeup_sources(&mut self) {}

        fn deep_sleep(&mut self, duration: Duration) {
            self.push(Call::Deep(duration));
            self.now_us = self.now_us.saturating_add(micros(duration));
            self.cause = WakeupCause::Timer;
        }

        fn light_sleep(&mut self, duration: Duration) -> WakeupCause {
            self.push(Call::Light(duration));
            let slept = if self.light_cause == WakeupCause::Timer {
                micros(duration)
            } else {
                micros(duration) / 2
            };
            self.now_us += slept;
            self.cause = self.light_cause;
            self.light_cause
        }

        fn wakeup_cause(&self) -> WakeupCause {
            self.cause
        }

        fn reset_reason(&self) -> ResetReason {
            self.reset
        }

        fn store_retained(&mut self, state: &RetainedPowerState) -> Result<(), HardwareFault> {
            self.retained = Some(*state);
            let _ = self.stored.push(*state);
            Ok(())
        }

        fn load_retained(&mut self) -> Option<RetainedPowerState> {
            self.retained
        }
    }

    type Controller = PowerController<FakeHal, TelemetryRing<64>>;

    fn controller() -> Controller {
        let mut controller = PowerController::new(
            FakeHal::new(),
            PowerConfig::DEFAULT,
            TelemetryRing::new(),
        );
        controller.initialize().expect("init");
        controller.hal_mut().calls.clear();
        controller
    }

    #[test]
    fn boot_state_has_only_rtc_and_watchdog() {
        let controller = controller();
        assert_eq!(controller.peripheral_config(), PeripheralConfig::BOOT);
        assert_eq!(controller.wakeup_cause(), WakeupCause::Undefined);
        assert_eq!(controller.state().last_reset_reason, ResetReason::PowerOn);
    }

    #[test]
    fn calls_before_initialize_are_rejected() {
        let mut controller: Controller =
            PowerController::new(FakeHal::new(), PowerConfig::DEFAULT, TelemetryRing::new());
        assert_eq!(controller.enable_peripherals(), Err(Fault::NotInitialized));
        assert_eq!(
            controller.enter_sleep(Duration::from_secs(5)),
            Err(Fault::NotInitialized)
        );
    }

    #[test]
    fn watchdog_failure_fails_initialization() {
        let mut hal = FakeHal::new();
        hal.fail_watchdog_arm = true;
        let mut controller: Controller =
            PowerController::new(hal, PowerConfig::DEFAULT, TelemetryRing::new());
        assert_eq!(
            controller.initialize(),
            Err(Fault::Hardware(HardwareFault::Watchdog))
        );
        assert!(!controller.is_initialized());
    }

    #[test]
    fn active_profile_limits_what_comes_up() {
        let mut controller = controller();
        controller.set_active_profile(PeripheralConfig {
            cellular: false,
            sdcard: false,
            ..PeripheralConfig::ACTIVE
        });
        controller.enable_peripherals().expect("enable");
        let config = controller.peripheral_config();
        assert!(config.external_5v && config.wifi && config.sensors);
        assert!(!config.cellular && !config.sdcard);
        let calls = &controller.hal().calls;
        assert!(!calls.contains(&Call::Rail(Rail::Cellular, true)));
    }

    #[test]
    fn supply_settles_before_downstream_rails() {
        let mut controller = controller();
        controller.enable_peripherals().expect("enable");
        let calls = &controller.hal().calls;
        assert_eq!(calls[0], Call::Rail(Rail::External5V, true));
        assert_eq!(calls[1], Call::Settle(crate::sequences::EXTERNAL_5V_SETTLE));
        assert_eq!(calls[2], Call::Rail(Rail::Wifi, true));
        assert_eq!(controller.peripheral_config(), PeripheralConfig::ACTIVE);
    }

    #[test]
    fn sleep_requests_are_clamped_to_bounds() {
        let mut controller = controller();
        controller.enter_sleep(Duration::from_millis(1)).expect("short");
        controller.enter_sleep(Duration::from_secs(10 * 3_600)).expect("long");
        controller.enter_sleep(Duration::from_secs(42)).expect("in range");

        assert_eq!(
            controller.hal().sleeps().as_slice(),
            &[
                crate::power::DEFAULT_MIN_SLEEP,
                crate::power::DEFAULT_MAX_SLEEP,
                Duration::from_secs(42),
            ]
        );
        assert!(
            controller
                .telemetry()
                .contains(|event| matches!(event, TelemetryEvent::SleepClamped { .. }))
        );
    }

    #[test]
    fn deep_sleep_latches_supply_and_counts_cycle() {
        let mut controller = controller();
        controller.enable_peripherals().expect("enable");
        controller.hal_mut().now_us += 2_000_000;
        controller.hal_mut().calls.clear();

        let cause = controller
            .enter_sleep(Duration::from_secs(60))
            .expect("sleep");
        assert_eq!(cause, WakeupCause::Timer);

        let calls = &controller.hal().calls;
        let hold = calls
            .iter()
            .position(|call| *call == Call::Hold(Rail::External5V))
            .expect("5V held");
        let sleep = calls
            .iter()
            .position(|call| matches!(call, Call::Deep(_)))
            .expect("slept");
        let release = calls
            .iter()
            .position(|call| *call == Call::Release)
            .expect("released");
        assert!(hold < sleep && sleep < release);
        assert!(calls.contains(&Call::Timer(Duration::from_secs(60))));

        let state = controller.state();
        assert_eq!(state.sleep_cycles, 1);
        assert_eq!(state.wakeup_events, 1);
        assert_eq!(state.total_sleep_us, 60_000_000);
        assert_eq!(state.total_active_us, 3_000_000);
        assert_eq!(controller.hal().retained.and_then(|r| r.pending_sleep_us), None);
    }

    #[test]
    fn unset_supply_is_not_held() {
        let mut controller = controller();
        controller.enter_sleep(Duration::from_secs(5)).expect("sleep");
        assert!(
            !controller
                .hal()
                .calls
                .iter()
                .any(|call| matches!(call, Call::Hold(_)))
        );
    }

    #[test]
    fn external_pin_is_armed_only_when_configured() {
        let mut controller = controller();
        controller
            .enter_deep_sleep(
                Duration::from_secs(5),
                WakeupSources::TIMER | WakeupSources::EXT0,
            )
            .expect("sleep");
        assert!(
            !controller
                .hal()
                .calls
                .iter()
                .any(|call| matches!(call, Call::Pin(_)))
        );

        controller
            .set_power_config(PowerConfig {
                wakeup_pin: Some(WakeupPin { pin: 4, level: true }),
                ..PowerConfig::DEFAULT
            })
            .expect("valid config");
        controller
            .enter_deep_sleep(
                Duration::from_secs(5),
                WakeupSources::TIMER | WakeupSources::EXT0,
            )
            .expect("sleep");
        assert!(controller.hal().calls.contains(&Call::Pin(4)));
    }

    #[test]
    fn light_sleep_reports_interruptions() {
        let mut controller = controller();
        assert_eq!(
            controller.enter_light_sleep(Duration::from_secs(10)),
            Ok(true)
        );

        controller.hal_mut().light_cause = WakeupCause::External;
        assert_eq!(
            controller.enter_light_sleep(Duration::from_secs(10)),
            Ok(false)
        );
        assert_eq!(controller.wakeup_cause(), WakeupCause::External);
        assert_eq!(controller.state().sleep_cycles, 2);
        assert_eq!(controller.state().total_sleep_us, 15_000_000);
    }

    #[test]
    fn watchdog_feed_failure_does_not_abort_sleep() {
        let mut controller = controller();
        controller.hal_mut().fail_watchdog_feed = true;
        let cause = controller
            .enter_sleep(Duration::from_secs(30))
            .expect("sleep continues");
        assert_eq!(cause, WakeupCause::Timer);
        assert!(controller.telemetry().contains(|event| matches!(
            event,
            TelemetryEvent::HardwareWarning(HardwareFault::Watchdog)
        )));
    }

    #[test]
    fn deep_sleep_reset_restores_retained_counters() {
        let mut hal = FakeHal::new();
        hal.reset = ResetReason::DeepSleep;
        hal.cause = WakeupCause::Timer;
        hal.retained = Some(RetainedPowerState {
            total_active_us: 4_000_000,
            total_sleep_us: 100_000_000,
            sleep_cycles: 3,
            wakeup_events: 3,
            pending_sleep_us: Some(300_000_000),
        });
        let mut controller: Controller =
            PowerController::new(hal, PowerConfig::DEFAULT, TelemetryRing::new());
        controller.initialize().expect("init");

        let state = controller.state();
        assert_eq!(state.sleep_cycles, 4);
        assert_eq!(state.wakeup_events, 4);
        assert_eq!(state.total_sleep_us, 400_000_000);
        assert_eq!(state.total_active_us, 4_000_000);
        assert_eq!(controller.wakeup_cause(), WakeupCause::Timer);
        assert_eq!(controller.hal().retained.and_then(|r| r.pending_sleep_us), None);
    }

    #[test]
    fn reset_out_of_open_ended_sleep_credits_nothing() {
        let mut hal = FakeHal::new();
        hal.reset = ResetReason::DeepSleep;
        hal.retained = Some(RetainedPowerState {
            total_active_us: 100_000_000,
            total_sleep_us: 900_000_000,
            sleep_cycles: 3,
            wakeup_events: 3,
            pending_sleep_us: Some(micros(SLEEP_UNTIL_INTERVENTION)),
        });
        let mut controller: Controller =
            PowerController::new(hal, PowerConfig::DEFAULT, TelemetryRing::new());
        controller.initialize().expect("init");

        let state = controller.state();
        assert_eq!(state.total_sleep_us, 900_000_000);
        assert_eq!(state.sleep_cycles, 3);
        assert_eq!(controller.hal().retained.and_then(|r| r.pending_sleep_us), None);
        let stats = controller.power_stats();
        assert!((stats.duty_cycle_percent - 10.0).abs() < 0.01);
        assert!((stats.average_sleep_seconds - 300.0).abs() < 0.01);
    }

    #[test]
    fn shutdown_leaves_no_sleep_to_credit() {
        let mut controller = controller();
        controller.shutdown(false);
        assert!(
            controller
                .hal()
                .stored
                .iter()
                .all(|record| record.pending_sleep_us.is_none())
        );
    }

    #[test]
    fn power_on_reset_ignores_stale_retained_counters() {
        let mut hal = FakeHal::new();
        hal.retained = Some(RetainedPowerState {
            sleep_cycles: 9,
            ..RetainedPowerState::default()
        });
        let mut controller: Controller =
            PowerController::new(hal, PowerConfig::DEFAULT, TelemetryRing::new());
        controller.initialize().expect("init");
        assert_eq!(controller.state().sleep_cycles, 0);
    }

    #[test]
    fn emergency_mode_is_guarded() {
        let mut controller = controller();
        controller.enable_peripherals().expect("enable");

        controller.enter_emergency_mode("test");
        assert!(controller.is_emergency_mode());
        assert_eq!(controller.emergency_reason(), Some("test"));
        assert_eq!(
            controller.peripheral_config(),
            PeripheralConfig {
                rtc: true,
                watchdog: true,
                ..PeripheralConfig::BOOT
            }
        );
        assert_eq!(
            controller.hal().sleeps().as_slice(),
            &[crate::power::EMERGENCY_SLEEP]
        );

        controller.enter_emergency_mode("again");
        assert_eq!(controller.hal().sleeps().len(), 1);
        assert_eq!(controller.emergency_reason(), Some("test"));
        assert!(
            controller
                .telemetry()
                .contains(|event| matches!(event, TelemetryEvent::EmergencyAlreadyActive))
        );
    }

    #[test]
    fn shutdown_sleeps_until_intervention_without_timer() {
        let mut controller = controller();
        controller.enable_peripherals().expect("enable");
        controller.hal_mut().calls.clear();
        controller.shutdown(false);

        let calls = &controller.hal().calls;
        assert!(calls.contains(&Call::Deep(SLEEP_UNTIL_INTERVENTION)));
        assert!(!calls.iter().any(|call| matches!(call, Call::Timer(_))));
        assert_eq!(calls[0], Call::Rail(Rail::Sensors, false));
        assert!(!controller.peripheral_config().external_5v);
    }

    #[test]
    fn health_check_detects_supply_mismatch() {
        let mut controller = controller();
        assert!(controller.perform_health_check());
        controller.hal_mut().rails[Rail::External5V.as_index()] = true;
        assert!(!controller.perform_health_check());
    }

    #[test]
    fn rejected_config_keeps_previous_values() {
        let mut controller = controller();
        let bad = PowerConfig {
            min_sleep: Duration::from_secs(100),
            max_sleep: Duration::from_secs(10),
            ..PowerConfig::DEFAULT
        };
        assert!(controller.set_power_config(bad).is_err());
        assert_eq!(*controller.config(), PowerConfig::DEFAULT);
    }
}
