//! DS1307-style register layout.
//!
//! Seven BCD time registers starting at 0x00, a control register at 0x07 and
//! 56 bytes of battery-backed RAM from 0x08. Bit 7 of the seconds register is
//! the clock-halt flag.

use super::datetime::{DateTime, MIN_YEAR};

pub const SECONDS: u8 = 0x00;
pub const MINUTES: u8 = 0x01;
pub const HOURS: u8 = 0x02;
pub const WEEKDAY: u8 = 0x03;
pub const DATE: u8 = 0x04;
pub const MONTH: u8 = 0x05;
pub const YEAR: u8 = 0x06;
pub const CONTROL: u8 = 0x07;
pub const RAM_START: u8 = 0x08;
pub const RAM_SIZE: usize = 56;

/// Number of consecutive time registers.
pub const TIME_REGISTER_COUNT: usize = 7;
/// Clock-halt bit in the seconds register.
pub const CLOCK_HALT: u8 = 0x80;
/// Control value with the square-wave output disabled.
pub const CONTROL_SQW_OFF: u8 = 0x00;

const HOUR_12_MODE: u8 = 0x40;
const HOUR_PM: u8 = 0x20;

#[must_use]
pub const fn bcd_to_bin(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

#[must_use]
pub const fn bin_to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Decodes the time registers, tolerating a chip left in 12-hour mode.
#[must_use]
pub fn decode_time(registers: &[u8; TIME_REGISTER_COUNT]) -> DateTime {
    let hours = registers[usize::from(HOURS)];
    let hour = if hours & HOUR_12_MODE == 0 {
        bcd_to_bin(hours & 0x3F)
    } else {
        let base = bcd_to_bin(hours & 0x1F) % 12;
        if hours & HOUR_PM == 0 { base } else { base + 12 }
    };

    DateTime::new(
        MIN_YEAR + u16::from(bcd_to_bin(registers[usize::from(YEAR)])),
        bcd_to_bin(registers[usize::from(MONTH)] & 0x1F),
        bcd_to_bin(registers[usize::from(DATE)] & 0x3F),
        hour,
        bcd_to_bin(registers[usize::from(MINUTES)] & 0x7F),
        bcd_to_bin(registers[usize::from(SECONDS)] & !CLOCK_HALT),
    )
}

/// Encodes `time` in 24-hour mode with the oscillator running.
#[must_use]
pub fn encode_time(time: &DateTime) -> [u8; TIME_REGISTER_COUNT] {
    let year = u8::try_from(time.year.saturating_sub(MIN_YEAR)).unwrap_or(99);
    let mut registers = [0_u8; TIME_REGISTER_COUNT];
    registers[usize::from(SECONDS)] = bin_to_bcd(time.second) & !CLOCK_HALT;
    registers[usize::from(MINUTES)] = bin_to_bcd(time.minute);
    registers[usize::from(HOURS)] = bin_to_bcd(time.hour);
    registers[usize::from(WEEKDAY)] = bin_to_bcd(time.day_of_week());
    registers[usize::from(DATE)] = bin_to_bcd(time.day);
    registers[usize::from(MONTH)] = bin_to_bcd(time.month);
    registers[usize::from(YEAR)] = bin_to_bcd(year.min(99));
    registers
}
