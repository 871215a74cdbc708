//! Platform capability set the power controller is written against.
//!
//! One implementation per target: the STM32 firmware drives real pins and
//! low-power modes, the emulator simulates them on a virtual clock.

use core::time::Duration;

use super::{ResetReason, RetainedPowerState, WakeupCause, WakeupPin};
use crate::error::HardwareFault;
use crate::sequences::Rail;

pub trait PowerHal {
    /// Monotonic microseconds since this boot.
    fn monotonic_micros(&self) -> u64;

    /// Drives a rail enable line. Polarity is the implementation's concern.
    fn drive_rail(&mut self, rail: Rail, enabled: bool) -> Result<(), HardwareFault>;

    /// Level actually present on the rail, for health checks.
    fn rail_enabled(&self, rail: Rail) -> bool;

    /// Busy or timed wait while a rail stabilises.
    fn settle(&mut self, duration: Duration);

    /// Latches the rail's current level so it survives deep sleep.
    fn hold_rail(&mut self, rail: Rail) -> Result<(), HardwareFault>;

    /// Releases every latched rail so the pins follow their outputs again.
    fn release_holds(&mut self) -> Result<(), HardwareFault>;

    fn arm_watchdog(&mut self, timeout: Duration) -> Result<(), HardwareFault>;

    fn feed_watchdog(&mut self) -> Result<(), HardwareFault>;

    fn configure_timer_wakeup(&mut self, after: Duration) -> Result<(), HardwareFault>;

    fn configure_pin_wakeup(&mut self, pin: WakeupPin) -> Result<(), HardwareFault>;

    /// Disarms every wakeup source.
    fn clear_wakeup_sources(&mut self);

    /// Enters deep sleep. On hardware this never returns; the next thing that
    /// runs is a reset with [`ResetReason::DeepSleep`]. Simulated platforms
    /// return once the virtual sleep has elapsed.
    fn deep_sleep(&mut self, duration: Duration);

    /// Enters light sleep and reports what ended it.
    fn light_sleep(&mut self, duration: Duration) -> WakeupCause;

    fn wakeup_cause(&self) -> WakeupCause;

    fn reset_reason(&self) -> ResetReason;

    /// Stores counters in memory that survives deep sleep.
    fn store_retained(&mut self, state: &RetainedPowerState) -> Result<(), HardwareFault>;

    /// Loads counters stored before the last deep sleep, if any.
    fn load_retained(&mut self) -> Option<RetainedPowerState>;
}
