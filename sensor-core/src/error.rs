//! Fault taxonomy shared by every service in the core.
//!
//! Faults are plain `Copy` values so they can be stored as "last error"
//! snapshots and forwarded to telemetry without allocation.

use core::fmt;

use crate::battery::SafetyViolation;

/// Register or pin level access failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HardwareFault {
    /// Bus transaction (I2C/UART) did not complete.
    Bus,
    /// The RTC oscillator was halted and could not be restarted.
    OscillatorHalted,
    /// A GPIO could not be configured or driven.
    GpioConfig,
    /// Watchdog could not be armed or fed.
    Watchdog,
    /// A wakeup source was rejected by the platform.
    WakeupConfig,
    /// The fuel gauge did not answer.
    FuelGauge,
}

/// Input rejected before any state was touched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValidationFault {
    /// Time text did not match a supported layout.
    MalformedTime,
    /// Time text parsed but one of its fields is out of range.
    TimeOutOfRange,
    /// Time equals the factory-default sentinel (2000-01-01).
    UnsetSentinel,
    /// Hour outside 0..=23.
    HourOutOfRange,
    /// Minimum sleep exceeds maximum sleep.
    SleepBounds,
    /// Battery thresholds are inverted or above 100 %.
    BatteryThresholds,
}

/// Persistence or buffer capacity was not available.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResourceExhaustion {
    /// Battery-backed storage write failed.
    PersistWrite,
    /// Scan event queue overflowed and events were dropped.
    ScanQueueFull,
}

/// Top-level fault returned by core services.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    Hardware(HardwareFault),
    Validation(ValidationFault),
    Policy(SafetyViolation),
    ResourceExhausted(ResourceExhaustion),
    /// Operation invoked before `initialize()` succeeded.
    NotInitialized,
}

impl Fault {
    /// Returns the coarse category label used in log lines.
    #[must_use]
    pub const fn category(self) -> &'static str {
        match self {
            Fault::Hardware(_) => "hardware",
            Fault::Validation(_) => "validation",
            Fault::Policy(_) => "policy",
            Fault::ResourceExhausted(_) => "resource",
            Fault::NotInitialized => "lifecycle",
        }
    }
}

impl From<HardwareFault> for Fault {
    fn from(value: HardwareFault) -> Self {
        Fault::Hardware(value)
    }
}

impl From<ValidationFault> for Fault {
    fn from(value: ValidationFault) -> Self {
        Fault::Validation(value)
    }
}

impl From<ResourceExhaustion> for Fault {
    fn from(value: ResourceExhaustion) -> Self {
        Fault::ResourceExhausted(value)
    }
}

impl fmt::Display for HardwareFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HardwareFault::Bus => "bus transaction failed",
            HardwareFault::OscillatorHalted => "oscillator could not be restarted",
            HardwareFault::GpioConfig => "gpio configuration failed",
            HardwareFault::Watchdog => "watchdog unavailable",
            HardwareFault::WakeupConfig => "wakeup source rejected",
            HardwareFault::FuelGauge => "fuel gauge not responding",
        };
        f.write_str(text)
    }
}

impl fmt::Display for ValidationFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl fmt::Display for ResourceExhaustion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Hardware(inner) => write!(f, "hardware fault: {inner}"),
            Fault::Validation(inner) => write!(f, "validation fault: {inner}"),
            Fault::Policy(inner) => write!(f, "policy violation: {inner}"),
            Fault::ResourceExhausted(inner) => write!(f, "resource exhausted: {inner}"),
            Fault::NotInitialized => f.write_str("service not initialized"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_preserve_category() {
        let fault: Fault = HardwareFault::Bus.into();
        assert_eq!(fault.category(), "hardware");

        let fault: Fault = ValidationFault::MalformedTime.into();
        assert!(matches!(
            fault,
            Fault::Validation(ValidationFault::MalformedTime)
        ));

        let fault: Fault = ResourceExhaustion::PersistWrite.into();
        assert_eq!(fault.category(), "resource");
    }
}
