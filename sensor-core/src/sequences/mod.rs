//! Power rail catalog and ordered sequencing tables.
//!
//! Rails are physically dependent: cellular, SD card and sensors hang off the
//! switched 5V rail, so the order in which rails are switched is part of the
//! hardware contract, not a convenience. The tables in [`power_up`] and
//! [`power_down`] are the only place that ordering is written down; the
//! power controller walks them step by step.

use core::time::Duration;

pub mod power_down;
pub mod power_up;

pub use power_down::{POWER_DOWN_STEPS, POWER_DOWN_TEMPLATE};
pub use power_up::{EXTERNAL_5V_SETTLE, POWER_UP_STEPS, POWER_UP_TEMPLATE};

/// Number of switchable rails.
pub const RAIL_COUNT: usize = 6;

/// Identifier for a switchable power domain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Rail {
    External5V,
    Wifi,
    Bluetooth,
    Cellular,
    SdCard,
    Sensors,
}

impl Rail {
    /// Deterministic index for lookups into [`ALL_RAILS`].
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            Rail::External5V => 0,
            Rail::Wifi => 1,
            Rail::Bluetooth => 2,
            Rail::Cellular => 3,
            Rail::SdCard => 4,
            Rail::Sensors => 5,
        }
    }

    /// Attempts to construct a [`Rail`] from a raw index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Rail::External5V),
            1 => Some(Rail::Wifi),
            2 => Some(Rail::Bluetooth),
            3 => Some(Rail::Cellular),
            4 => Some(Rail::SdCard),
            5 => Some(Rail::Sensors),
            _ => None,
        }
    }

    pub(crate) const fn as_code(self) -> u16 {
        match self {
            Rail::External5V => 0,
            Rail::Wifi => 1,
            Rail::Bluetooth => 2,
            Rail::Cellular => 3,
            Rail::SdCard => 4,
            Rail::Sensors => 5,
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        rail_by_id(self).name
    }

    /// Returns `true` when the rail is fed from the switched 5V supply.
    #[must_use]
    pub const fn needs_external_5v(self) -> bool {
        rail_by_id(self).downstream_of_5v
    }
}

/// Electrical level that turns a rail on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RailPolarity {
    ActiveLow,
    ActiveHigh,
}

impl RailPolarity {
    /// Pin level (`true` = high) that puts the rail in `enabled` state.
    #[must_use]
    pub const fn level_for(self, enabled: bool) -> bool {
        match self {
            RailPolarity::ActiveLow => !enabled,
            RailPolarity::ActiveHigh => enabled,
        }
    }
}

/// Board metadata for a rail enable line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RailLine {
    pub id: Rail,
    pub name: &'static str,
    pub mcu_pin: &'static str,
    pub polarity: RailPolarity,
    pub downstream_of_5v: bool,
}

impl RailLine {
    pub const fn new(
        id: Rail,
        name: &'static str,
        mcu_pin: &'static str,
        polarity: RailPolarity,
        downstream_of_5v: bool,
    ) -> Self {
        Self {
            id,
            name,
            mcu_pin,
            polarity,
            downstream_of_5v,
        }
    }
}

/// Compile-time catalog of every rail enable line.
pub const ALL_RAILS: [RailLine; RAIL_COUNT] = [
    RailLine::new(Rail::External5V, "5V", "PB0", RailPolarity::ActiveLow, false),
    RailLine::new(Rail::Wifi, "WIFI", "PC6", RailPolarity::ActiveHigh, false),
    RailLine::new(Rail::Bluetooth, "BLE", "PC7", RailPolarity::ActiveHigh, false),
    RailLine::new(Rail::Cellular, "CELL", "PB4", RailPolarity::ActiveHigh, true),
    RailLine::new(Rail::SdCard, "SD", "PB5", RailPolarity::ActiveHigh, true),
    RailLine::new(Rail::Sensors, "SENS", "PB6", RailPolarity::ActiveHigh, true),
];

/// Retrieve rail metadata by identifier.
#[must_use]
pub const fn rail_by_id(id: Rail) -> RailLine {
    ALL_RAILS[id.as_index()]
}

/// Action taken on a rail during a step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RailAction {
    Enable,
    Disable,
}

/// Ordered operation the controller applies to a rail.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RailStep {
    pub rail: Rail,
    pub action: RailAction,
    /// Time the rail must be left alone after switching before the next step.
    pub settle: Duration,
}

impl RailStep {
    pub const fn new(rail: Rail, action: RailAction, settle: Duration) -> Self {
        Self {
            rail,
            action,
            settle,
        }
    }
}

/// Direction described by a template.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SequenceKind {
    PowerUp,
    PowerDown,
}

/// Immutable rail sequence shared across targets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SequenceTemplate {
    pub kind: SequenceKind,
    pub phases: &'static [RailStep],
}

impl SequenceTemplate {
    pub const fn new(kind: SequenceKind, phases: &'static [RailStep]) -> Self {
        Self { kind, phases }
    }

    /// Returns the ordered steps that make up the sequence.
    #[must_use]
    pub const fn steps(&self) -> &'static [RailStep] {
        self.phases
    }

    #[must_use]
    pub const fn step_count(&self) -> usize {
        self.phases.len()
    }

    /// Sum of all settle times in the template.
    #[must_use]
    pub fn total_settle(&self) -> Duration {
        self.phases
            .iter()
            .fold(Duration::ZERO, |acc, step| acc + step.settle)
    }

    /// Position of `rail` within the template.
    #[must_use]
    pub fn position_of(&self, rail: Rail) -> Option<usize> {
        self.phases.iter().position(|step| step.rail == rail)
    }
}
