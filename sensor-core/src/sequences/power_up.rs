//! Power-up order for the peripheral rails.
//!
//! The switched 5V supply comes up first and is given a full second to
//! stabilise before anything downstream is touched; switching a load onto a
//! rail that is still ramping browns out the dependent ICs.

use core::time::Duration;

use super::{Rail, RailAction, RailStep, SequenceKind, SequenceTemplate};

/// Stabilisation time after enabling the 5V rail.
pub const EXTERNAL_5V_SETTLE: Duration = Duration::from_millis(1_000);

/// Ordered rail steps that implement the power-up sequence.
pub const POWER_UP_STEPS: [RailStep; 6] = [
    RailStep::new(Rail::External5V, RailAction::Enable, EXTERNAL_5V_SETTLE),
    RailStep::new(Rail::Wifi, RailAction::Enable, Duration::ZERO),
    RailStep::new(Rail::Bluetooth, RailAction::Enable, Duration::ZERO),
    RailStep::new(Rail::Cellular, RailAction::Enable, Duration::ZERO),
    RailStep::new(Rail::SdCard, RailAction::Enable, Duration::ZERO),
    RailStep::new(Rail::Sensors, RailAction::Enable, Duration::ZERO),
];

/// Sequence template describing the power-up workflow.
pub const POWER_UP_TEMPLATE: SequenceTemplate =
    SequenceTemplate::new(SequenceKind::PowerUp, &POWER_UP_STEPS);
