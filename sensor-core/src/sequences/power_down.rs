//! Power-down order: the exact reverse of power-up, 5V last.

use core::time::Duration;

use super::{Rail, RailAction, RailStep, SequenceKind, SequenceTemplate};

/// Ordered rail steps that implement the power-down sequence.
pub const POWER_DOWN_STEPS: [RailStep; 6] = [
    RailStep::new(Rail::Sensors, RailAction::Disable, Duration::ZERO),
    RailStep::new(Rail::SdCard, RailAction::Disable, Duration::ZERO),
    RailStep::new(Rail::Cellular, RailAction::Disable, Duration::ZERO),
    RailStep::new(Rail::Bluetooth, RailAction::Disable, Duration::ZERO),
    RailStep::new(Rail::Wifi, RailAction::Disable, Duration::ZERO),
    RailStep::new(Rail::External5V, RailAction::Disable, Duration::ZERO),
];

/// Sequence template describing the power-down workflow.
pub const POWER_DOWN_TEMPLATE: SequenceTemplate =
    SequenceTemplate::new(SequenceKind::PowerDown, &POWER_DOWN_STEPS);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supply_is_switched_off_last() {
        assert_eq!(POWER_DOWN_TEMPLATE.kind, SequenceKind::PowerDown);
        let last = POWER_DOWN_STEPS.last().expect("non-empty template");
        assert_eq!(last.rail, Rail::External5V);
        assert!(
            POWER_DOWN_STEPS
                .iter()
                .all(|step| step.action == RailAction::Disable)
        );
    }
}
