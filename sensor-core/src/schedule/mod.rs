//! Day/night sleep policy.
//!
//! The evaluator is a pure function of the current hour and a
//! [`SleepSchedule`]; the RTC service owns the schedule and feeds it the hour.

use core::time::Duration;

use crate::error::ValidationFault;

/// Hour at which the night window opens by default.
pub const DEFAULT_NIGHT_START_HOUR: u8 = 22;
/// Hour at which the night window closes by default.
pub const DEFAULT_NIGHT_END_HOUR: u8 = 6;
/// Sleep between cycles during the night window.
pub const DEFAULT_NIGHT_SLEEP: Duration = Duration::from_secs(30 * 60);
/// Sleep between cycles outside the night window.
pub const DEFAULT_DAY_SLEEP: Duration = Duration::from_secs(5 * 60);

const HOURS_PER_DAY: u8 = 24;

/// Day/night sleep policy. The night window is half-open `[start, end)` and
/// wraps past midnight when `start > end`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SleepSchedule {
    night_start_hour: u8,
    night_end_hour: u8,
    pub enabled: bool,
    pub night_sleep: Duration,
    pub day_sleep: Duration,
}

impl SleepSchedule {
    /// Factory schedule: 22:00 to 06:00 is night.
    pub const DEFAULT: Self = Self {
        night_start_hour: DEFAULT_NIGHT_START_HOUR,
        night_end_hour: DEFAULT_NIGHT_END_HOUR,
        enabled: true,
        night_sleep: DEFAULT_NIGHT_SLEEP,
        day_sleep: DEFAULT_DAY_SLEEP,
    };

    /// Builds an enabled schedule, rejecting hours outside `0..=23`.
    pub const fn new(
        night_start_hour: u8,
        night_end_hour: u8,
        night_sleep: Duration,
        day_sleep: Duration,
    ) -> Result<Self, ValidationFault> {
        if night_start_hour >= HOURS_PER_DAY || night_end_hour >= HOURS_PER_DAY {
            return Err(ValidationFault::HourOutOfRange);
        }
        Ok(Self {
            night_start_hour,
            night_end_hour,
            enabled: true,
            night_sleep,
            day_sleep,
        })
    }

    /// Same schedule with evaluation switched off (day duration always).
    #[must_use]
    pub const fn disabled(self) -> Self {
        Self {
            enabled: false,
            ..self
        }
    }

    #[must_use]
    pub const fn night_start_hour(&self) -> u8 {
        self.night_start_hour
    }

    #[must_use]
    pub const fn night_end_hour(&self) -> u8 {
        self.night_end_hour
    }

    /// Returns `true` when the night window crosses midnight.
    #[must_use]
    pub const fn wraps_midnight(&self) -> bool {
        self.night_start_hour > self.night_end_hour
    }

    /// Night window membership, ignoring the enabled flag.
    ///
    /// Equal start and end hours describe a window covering the whole day.
    #[must_use]
    pub const fn is_night(&self, hour: u8) -> bool {
        if hour >= HOURS_PER_DAY {
            return false;
        }
        let start = self.night_start_hour;
        let end = self.night_end_hour;
        if start == end {
            true
        } else if start > end {
            hour >= start || hour < end
        } else {
            start <= hour && hour < end
        }
    }
}

impl Default for SleepSchedule {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Sleep duration for `current_hour` under `schedule`.
///
/// A disabled schedule, or an hour outside `0..=23`, yields the day duration.
#[must_use]
pub const fn compute_sleep_duration(current_hour: u8, schedule: &SleepSchedule) -> Duration {
    if schedule.enabled && schedule.is_night(current_hour) {
        schedule.night_sleep
    } else {
        schedule.day_sleep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NIGHT: Duration = Duration::from_secs(1_800);
    const DAY: Duration = Duration::from_secs(300);

    fn schedule(start: u8, end: u8) -> SleepSchedule {
        SleepSchedule::new(start, end, NIGHT, DAY).expect("valid hours")
    }

    #[test]
    fn default_window_spans_midnight() {
        let schedule = SleepSchedule::default();
        for hour in [22, 23, 0, 1, 2, 3, 4, 5] {
            assert_eq!(compute_sleep_duration(hour, &schedule), DEFAULT_NIGHT_SLEEP);
        }
        for hour in 6..22 {
            assert_eq!(compute_sleep_duration(hour, &schedule), DEFAULT_DAY_SLEEP);
        }
    }

    #[test]
    fn every_window_matches_membership_rule() {
        for start in 0..24 {
            for end in 0..24 {
                let schedule = schedule(start, end);
                for hour in 0..24 {
                    let expected_night = if start == end {
                        true
                    } else if start > end {
                        hour >= start || hour < end
                    } else {
                        (start..end).contains(&hour)
                    };
                    let expected = if expected_night { NIGHT } else { DAY };
                    assert_eq!(
                        compute_sleep_duration(hour, &schedule),
                        expected,
                        "start={start} end={end} hour={hour}"
                    );
                }
            }
        }
    }

    #[test]
    fn same_day_window_is_half_open() {
        let schedule = schedule(1, 5);
        assert_eq!(compute_sleep_duration(0, &schedule), DAY);
        assert_eq!(compute_sleep_duration(1, &schedule), NIGHT);
        assert_eq!(compute_sleep_duration(4, &schedule), NIGHT);
        assert_eq!(compute_sleep_duration(5, &schedule), DAY);
        assert!(!schedule.wraps_midnight());
    }

    #[test]
    fn equal_hours_cover_the_whole_day() {
        let schedule = schedule(7, 7);
        assert!((0..24).all(|hour| compute_sleep_duration(hour, &schedule) == NIGHT));
    }

    #[test]
    fn disabled_schedule_always_uses_day_duration() {
        let schedule = schedule(22, 6).disabled();
        assert!((0..24).all(|hour| compute_sleep_duration(hour, &schedule) == DAY));
    }

    #[test]
    fn out_of_range_hours_are_rejected_or_treated_as_day() {
        assert_eq!(
            SleepSchedule::new(24, 6, NIGHT, DAY),
            Err(ValidationFault::HourOutOfRange)
        );
        assert_eq!(
            SleepSchedule::new(22, 30, NIGHT, DAY),
            Err(ValidationFault::HourOutOfRange)
        );
        assert_eq!(compute_sleep_duration(24, &schedule(7, 7)), DAY);
    }
}
