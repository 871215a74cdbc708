//! Battery safety monitor.
//!
//! Wraps the fuel gauge as a read-only oracle: reads a status snapshot,
//! checks it against [`SafetyLimits`] and remembers the last reading and the
//! last fault under a single mutex.

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Vec;

use crate::error::{Fault, HardwareFault};
use crate::telemetry::{Component, Severity, TelemetryEvent, TelemetrySink};

/// Upper bound on simultaneous violations (one per checked quantity).
pub const MAX_VIOLATIONS: usize = 5;

/// Fuel gauge reading.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BatteryStatus {
    pub voltage_mv: u16,
    /// Positive while charging.
    pub current_ma: i16,
    pub state_of_charge: u8,
    pub state_of_health: u8,
    pub cell_temperature_c: i16,
    pub board_temperature_c: i16,
    pub cycle_count: u16,
    pub time_to_empty_min: u16,
}

impl BatteryStatus {
    /// State of charge as the float percentage the power policy consumes.
    #[must_use]
    pub fn charge_percent(&self) -> f32 {
        f32::from(self.state_of_charge)
    }
}

/// Register-level fuel gauge client.
pub trait FuelGauge {
    fn read_status(&mut self) -> Result<BatteryStatus, HardwareFault>;
}

impl<G: FuelGauge + ?Sized> FuelGauge for &mut G {
    fn read_status(&mut self) -> Result<BatteryStatus, HardwareFault> {
        (**self).read_status()
    }
}

/// Safe operating envelope.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SafetyLimits {
    pub min_state_of_charge: u8,
    pub max_state_of_charge: u8,
    pub min_state_of_health: u8,
    pub min_cell_temperature_c: i16,
    pub max_cell_temperature_c: i16,
    pub min_board_temperature_c: i16,
    pub max_board_temperature_c: i16,
}

impl SafetyLimits {
    pub const DEFAULT: Self = Self {
        min_state_of_charge: 10,
        max_state_of_charge: 101,
        min_state_of_health: 50,
        min_cell_temperature_c: 4,
        max_cell_temperature_c: 30,
        min_board_temperature_c: 2,
        max_board_temperature_c: 30,
    };
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A reading outside [`SafetyLimits`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SafetyViolation {
    ChargeOutOfRange { percent: u8 },
    HealthBelowMinimum { percent: u8 },
    CellTemperature { celsius: i16 },
    BoardTemperature { celsius: i16 },
}

impl fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyViolation::ChargeOutOfRange { percent } => {
                write!(f, "state of charge {percent}% out of range")
            }
            SafetyViolation::HealthBelowMinimum { percent } => {
                write!(f, "state of health {percent}% below minimum")
            }
            SafetyViolation::CellTemperature { celsius } => {
                write!(f, "cell temperature {celsius}C out of range")
            }
            SafetyViolation::BoardTemperature { celsius } => {
                write!(f, "board temperature {celsius}C out of range")
            }
        }
    }
}

/// Violations found in one reading.
pub type Violations = Vec<SafetyViolation, MAX_VIOLATIONS>;

/// Checks `status` against `limits`, returning every violated bound.
#[must_use]
pub fn check_safety_limits(status: &BatteryStatus, limits: &SafetyLimits) -> Violations {
    let mut violations = Violations::new();
    let soc = status.state_of_charge;
    if soc < limits.min_state_of_charge || soc > limits.max_state_of_charge {
        let _ = violations.push(SafetyViolation::ChargeOutOfRange { percent: soc });
    }
    if status.state_of_health < limits.min_state_of_health {
        let _ = violations.push(SafetyViolation::HealthBelowMinimum {
            percent: status.state_of_health,
        });
    }
    let cell = status.cell_temperature_c;
    if !(limits.min_cell_temperature_c..=limits.max_cell_temperature_c).contains(&cell) {
        let _ = violations.push(SafetyViolation::CellTemperature { celsius: cell });
    }
    let board = status.board_temperature_c;
    if !(limits.min_board_temperature_c..=limits.max_board_temperature_c).contains(&board) {
        let _ = violations.push(SafetyViolation::BoardTemperature { celsius: board });
    }
    violations
}

/// Verdict of one monitoring pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatteryAssessment {
    Healthy(BatteryStatus),
    Violation {
        status: BatteryStatus,
        violations: Violations,
    },
    /// The gauge could not be read; callers fall back to a conservative default.
    Unknown(HardwareFault),
}

impl BatteryAssessment {
    /// Reading, when one was obtained.
    #[must_use]
    pub fn status(&self) -> Option<&BatteryStatus> {
        match self {
            BatteryAssessment::Healthy(status) | BatteryAssessment::Violation { status, .. } => {
                Some(status)
            }
            BatteryAssessment::Unknown(_) => None,
        }
    }
}

struct MonitorState<G, T> {
    gauge: G,
    telemetry: T,
    limits: SafetyLimits,
    last_status: Option<BatteryStatus>,
    last_fault: Option<Fault>,
}

/// Fuel gauge wrapper with safety evaluation.
pub struct BatterySafetyMonitor<M: RawMutex, G, T> {
    state: Mutex<M, RefCell<MonitorState<G, T>>>,
}

impl<M, G, T> BatterySafetyMonitor<M, G, T>
where
    M: RawMutex,
    G: FuelGauge,
    T: TelemetrySink,
{
    pub const fn new(gauge: G, limits: SafetyLimits, telemetry: T) -> Self {
        Self {
            state: Mutex::new(RefCell::new(MonitorState {
                gauge,
                telemetry,
                limits,
                last_status: None,
                last_fault: None,
            })),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MonitorState<G, T>) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Reads the gauge. A failed read is logged and leaves the previous
    /// snapshot in place.
    pub fn read_status(&self) -> Result<BatteryStatus, Fault> {
        self.with_state(|state| match state.gauge.read_status() {
            Ok(status) => {
                state.last_status = Some(status);
                state.telemetry.emit(
                    Severity::Debug,
                    Component::Battery,
                    TelemetryEvent::BatteryReading {
                        percent: status.state_of_charge,
                        voltage_mv: status.voltage_mv,
                    },
                );
                Ok(status)
            }
            Err(fault) => {
                state.last_fault = Some(fault.into());
                state.telemetry.emit(
                    Severity::Error,
                    Component::Battery,
                    TelemetryEvent::BatteryUnavailable,
                );
                Err(fault.into())
            }
        })
    }

    /// Reads and validates. Violations are logged at critical severity.
    pub fn assess(&self) -> BatteryAssessment {
        let status = match self.read_status() {
            Ok(status) => status,
            Err(Fault::Hardware(fault)) => return BatteryAssessment::Unknown(fault),
            Err(_) => return BatteryAssessment::Unknown(HardwareFault::FuelGauge),
        };

        self.with_state(|state| {
            let violations = check_safety_limits(&status, &state.limits);
            if violations.is_empty() {
                return BatteryAssessment::Healthy(status);
            }
            for violation in &violations {
                state.telemetry.emit(
                    Severity::Critical,
                    Component::Battery,
                    TelemetryEvent::SafetyViolation(*violation),
                );
            }
            state.last_fault = violations.first().map(|violation| Fault::Policy(*violation));
            BatteryAssessment::Violation { status, violations }
        })
    }

    pub fn last_status(&self) -> Option<BatteryStatus> {
        self.with_state(|state| state.last_status)
    }

    pub fn last_fault(&self) -> Option<Fault> {
        self.with_state(|state| state.last_fault)
    }

    pub fn limits(&self) -> SafetyLimits {
        self.with_state(|state| state.limits)
    }

    pub fn set_limits(&self, limits: SafetyLimits) {
        self.with_state(|state| state.limits = limits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use crate::telemetry::TelemetryRing;

    const NOMINAL: BatteryStatus = BatteryStatus {
        voltage_mv: 3_900,
        current_ma: -120,
        state_of_charge: 64,
        state_of_health: 97,
        cell_temperature_c: 21,
        board_temperature_c: 24,
        cycle_count: 12,
        time_to_empty_min: 600,
    };

    struct ScriptedGauge {
        reading: Result<BatteryStatus, HardwareFault>,
    }

    impl FuelGauge for ScriptedGauge {
        fn read_status(&mut self) -> Result<BatteryStatus, HardwareFault> {
            self.reading
        }
    }

    fn monitor(
        reading: Result<BatteryStatus, HardwareFault>,
    ) -> BatterySafetyMonitor<NoopRawMutex, ScriptedGauge, TelemetryRing<16>> {
        BatterySafetyMonitor::new(
            ScriptedGauge { reading },
            SafetyLimits::DEFAULT,
            TelemetryRing::new(),
        )
    }

    #[test]
    fn nominal_reading_is_healthy() {
        let monitor = monitor(Ok(NOMINAL));
        assert_eq!(monitor.assess(), BatteryAssessment::Healthy(NOMINAL));
        assert_eq!(monitor.last_status(), Some(NOMINAL));
        assert_eq!(monitor.last_fault(), None);
    }

    #[test]
    fn every_out_of_range_quantity_is_reported() {
        let status = BatteryStatus {
            state_of_charge: 8,
            state_of_health: 40,
            cell_temperature_c: 31,
            board_temperature_c: 1,
            ..NOMINAL
        };
        let violations = check_safety_limits(&status, &SafetyLimits::DEFAULT);
        assert_eq!(
            violations.as_slice(),
            &[
                SafetyViolation::ChargeOutOfRange { percent: 8 },
                SafetyViolation::HealthBelowMinimum { percent: 40 },
                SafetyViolation::CellTemperature { celsius: 31 },
                SafetyViolation::BoardTemperature { celsius: 1 },
            ]
        );
    }

    #[test]
    fn limits_are_inclusive() {
        let status = BatteryStatus {
            state_of_charge: 10,
            state_of_health: 50,
            cell_temperature_c: 4,
            board_temperature_c: 30,
            ..NOMINAL
        };
        assert!(check_safety_limits(&status, &SafetyLimits::DEFAULT).is_empty());
    }

    #[test]
    fn violation_records_policy_fault() {
        let cold = BatteryStatus {
            cell_temperature_c: -5,
            ..NOMINAL
        };
        let monitor = monitor(Ok(cold));
        let assessment = monitor.assess();
        assert!(matches!(assessment, BatteryAssessment::Violation { .. }));
        assert_eq!(assessment.status(), Some(&cold));
        assert_eq!(
            monitor.last_fault(),
            Some(Fault::Policy(SafetyViolation::CellTemperature { celsius: -5 }))
        );
    }

    #[test]
    fn gauge_failure_yields_unknown() {
        let monitor = monitor(Err(HardwareFault::FuelGauge));
        let assessment = monitor.assess();
        assert_eq!(assessment, BatteryAssessment::Unknown(HardwareFault::FuelGauge));
        assert_eq!(assessment.status(), None);
        assert_eq!(monitor.last_status(), None);
        assert_eq!(
            monitor.last_fault(),
            Some(Fault::Hardware(HardwareFault::FuelGauge))
        );
    }
}
