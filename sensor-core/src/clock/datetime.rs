//! Calendar time as kept by the RTC chip, and the network time parsers.
//!
//! Two textual layouts are accepted: the cellular module's
//! `YY/MM/DD,HH:MM:SS±ZZ` (optionally wrapped in quotes as `+CCLK` echoes
//! it) and ISO-8601 `YYYY-MM-DDTHH:MM:SS[Z]`, which also tolerates a space in
//! place of the `T`. The cellular offset is in quarter hours; the RTC keeps
//! the local wall-clock time the network reports.

use core::fmt;
use core::str::FromStr;

use winnow::combinator::{alt, opt};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::take_while;

use crate::error::ValidationFault;

/// First year the RTC can represent.
pub const MIN_YEAR: u16 = 2000;
/// Last year the RTC can represent.
pub const MAX_YEAR: u16 = 2099;
/// Largest UTC offset the network reports, in quarter hours (+14:00).
pub const MAX_OFFSET_QUARTERS: i8 = 56;

const SECONDS_PER_MINUTE: i32 = 60;
const SECONDS_PER_HOUR: i32 = 3_600;
const SECONDS_PER_DAY: i32 = 86_400;

/// Broken-down wall-clock time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    /// Value a never-set RTC reports.
    pub const UNSET: Self = Self::new(MIN_YEAR, 1, 1, 0, 0, 0);

    pub const fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    /// Field range checks. Days are calendar-naive (1..=31 for every month).
    pub const fn validate(&self) -> Result<(), ValidationFault> {
        if self.year < MIN_YEAR
            || self.year > MAX_YEAR
            || self.month < 1
            || self.month > 12
            || self.day < 1
            || self.day > 31
            || self.hour > 23
            || self.minute > 59
            || self.second > 59
        {
            return Err(ValidationFault::TimeOutOfRange);
        }
        Ok(())
    }

    /// Returns `true` for the factory-default date (2000-01-01, any time).
    #[must_use]
    pub const fn is_unset_sentinel(&self) -> bool {
        self.year == MIN_YEAR && self.month == 1 && self.day == 1
    }

    /// In range and not the unset sentinel.
    #[must_use]
    pub const fn is_plausible(&self) -> bool {
        self.validate().is_ok() && !self.is_unset_sentinel()
    }

    /// ISO weekday (1 = Monday .. 7 = Sunday) via Zeller's congruence.
    ///
    /// The DS1307 weekday register only has to advance once per day at
    /// midnight; the chip gives the values no meaning. ISO order is used so
    /// register 0x03 agrees with the rest of this crate.
    #[must_use]
    pub fn day_of_week(&self) -> u8 {
        let (month, year) = if self.month < 3 {
            (i32::from(self.month) + 12, i32::from(self.year) - 1)
        } else {
            (i32::from(self.month), i32::from(self.year))
        };
        let k = year % 100;
        let j = year / 100;
        let zeller = (i32::from(self.day) + (13 * (month + 1)) / 5 + k + k / 4 + j / 4 - 2 * j)
            .rem_euclid(7);
        // Zeller counts from Saturday = 0.
        let iso = (zeller + 5).rem_euclid(7) + 1;
        u8::try_from(iso).unwrap_or(1)
    }

    /// Seconds since the start of an imaginary month: only day-of-month,
    /// hour, minute and second contribute.
    #[must_use]
    pub fn linear_seconds(&self) -> i32 {
        i32::from(self.second)
            + i32::from(self.minute) * SECONDS_PER_MINUTE
            + i32::from(self.hour) * SECONDS_PER_HOUR
            + i32::from(self.day) * SECONDS_PER_DAY
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Drift of the hardware clock against an authoritative time, in seconds.
///
/// Positive when the hardware clock is behind. Month and year are ignored,
/// so a correction across a month boundary is under-counted.
#[must_use]
pub fn drift_seconds(authoritative: &DateTime, hardware: &DateTime) -> i32 {
    authoritative.linear_seconds() - hardware.linear_seconds()
}

/// Which textual layout a network time came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimeFormat {
    Cellular,
    Iso8601,
}

/// Parsed network time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NetworkTime {
    pub local: DateTime,
    /// Offset from UTC in quarter hours (always zero for ISO input).
    pub offset_quarters: i8,
    pub format: TimeFormat,
}

/// Parses and range-checks a network time string.
pub fn parse_network_time(text: &str) -> Result<NetworkTime, ValidationFault> {
    let parsed = alt((cellular(), iso8601()))
        .parse(text.trim())
        .map_err(|_| ValidationFault::MalformedTime)?;
    parsed.local.validate()?;
    if parsed.offset_quarters.unsigned_abs() > MAX_OFFSET_QUARTERS.unsigned_abs() {
        return Err(ValidationFault::TimeOutOfRange);
    }
    Ok(parsed)
}

/// Structural and semantic validity check, also rejecting the unset sentinel.
#[must_use]
pub fn is_valid_time(text: &str) -> bool {
    parse_network_time(text).is_ok_and(|parsed| !parsed.local.is_unset_sentinel())
}

fn digits<'a, T: FromStr>(count: usize) -> impl Parser<&'a str, T, ContextError> {
    take_while(count, |c: char| c.is_ascii_digit()).parse_to()
}

fn clock_fields<'a>() -> impl Parser<&'a str, (u8, u8, u8), ContextError> {
    move |input: &mut &'a str| {
        let hour = digits(2).parse_next(input)?;
        ':'.parse_next(input)?;
        let minute = digits(2).parse_next(input)?;
        ':'.parse_next(input)?;
        let second = digits(2).parse_next(input)?;
        Ok((hour, minute, second))
    }
}

fn cellular<'a>() -> impl Parser<&'a str, NetworkTime, ContextError> {
    move |input: &mut &'a str| {
        let quoted = opt('"').parse_next(input)?.is_some();
        let year: u16 = digits(2).parse_next(input)?;
        '/'.parse_next(input)?;
        let month = digits(2).parse_next(input)?;
        '/'.parse_next(input)?;
        let day = digits(2).parse_next(input)?;
        ','.parse_next(input)?;
        let (hour, minute, second) = clock_fields().parse_next(input)?;
        let sign = alt(('+'.value(1_i8), '-'.value(-1_i8))).parse_next(input)?;
        let quarters: i8 = digits(2).parse_next(input)?;
        if quoted {
            '"'.parse_next(input)?;
        }

        Ok(NetworkTime {
            local: DateTime::new(MIN_YEAR + year, month, day, hour, minute, second),
            offset_quarters: sign * quarters,
            format: TimeFormat::Cellular,
        })
    }
}

fn iso8601<'a>() -> impl Parser<&'a str, NetworkTime, ContextError> {
    move |input: &mut &'a str| {
        let year = digits(4).parse_next(input)?;
        '-'.parse_next(input)?;
        let month = digits(2).parse_next(input)?;
        '-'.parse_next(input)?;
        let day = digits(2).parse_next(input)?;
        alt(('T', ' ')).parse_next(input)?;
        let (hour, minute, second) = clock_fields().parse_next(input)?;
        opt('Z').parse_next(input)?;

        Ok(NetworkTime {
            local: DateTime::new(year, month, day, hour, minute, second),
            offset_quarters: 0,
            format: TimeFormat::Iso8601,
        })
    }
}
