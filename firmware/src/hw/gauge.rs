//! BQ34Z100 standard-command reads over the shared I2C bus.
//!
//! Only the read-only standard commands the safety monitor needs are used;
//! data-flash configuration is done at the factory.

use sensor_core::HardwareFault;
use sensor_core::battery::{BatteryStatus, FuelGauge};

use super::SharedI2c;

pub const BQ34Z100_ADDRESS: u8 = 0x55;

mod command {
    pub const STATE_OF_CHARGE: u8 = 0x02;
    pub const VOLTAGE: u8 = 0x08;
    pub const TEMPERATURE: u8 = 0x0C;
    pub const CURRENT: u8 = 0x10;
    pub const AVERAGE_TIME_TO_EMPTY: u8 = 0x18;
    pub const PCB_TEMPERATURE: u8 = 0x2A;
    pub const CYCLE_COUNT: u8 = 0x2C;
    pub const STATE_OF_HEALTH: u8 = 0x2E;
}

/// Temperatures are reported in 0.1 K.
#[allow(clippy::cast_possible_truncation)]
fn decikelvin_to_celsius(raw: u16) -> i16 {
    ((i32::from(raw) - 2_731) / 10) as i16
}

pub struct Bq34z100 {
    bus: &'static SharedI2c,
}

impl Bq34z100 {
    pub const fn new(bus: &'static SharedI2c) -> Self {
        Self { bus }
    }

    fn read_word(&self, command: u8) -> Result<u16, HardwareFault> {
        let mut raw = [0_u8; 2];
        self.bus.lock(|cell| {
            cell.borrow_mut()
                .blocking_write_read(BQ34Z100_ADDRESS, &[command], &mut raw)
                .map_err(|_| HardwareFault::FuelGauge)
        })?;
        Ok(u16::from_le_bytes(raw))
    }

    fn read_byte(&self, command: u8) -> Result<u8, HardwareFault> {
        let mut raw = [0_u8; 1];
        self.bus.lock(|cell| {
            cell.borrow_mut()
                .blocking_write_read(BQ34Z100_ADDRESS, &[command], &mut raw)
                .map_err(|_| HardwareFault::FuelGauge)
        })?;
        Ok(raw[0])
    }
}

impl FuelGauge for Bq34z100 {
    #[allow(clippy::cast_possible_wrap)]
    fn read_status(&mut self) -> Result<BatteryStatus, HardwareFault> {
        Ok(BatteryStatus {
            voltage_mv: self.read_word(command::VOLTAGE)?,
            current_ma: self.read_word(command::CURRENT)? as i16,
            state_of_charge: self.read_byte(command::STATE_OF_CHARGE)?,
            state_of_health: self.read_byte(command::STATE_OF_HEALTH)?,
            cell_temperature_c: decikelvin_to_celsius(self.read_word(command::TEMPERATURE)?),
            board_temperature_c: decikelvin_to_celsius(
                self.read_word(command::PCB_TEMPERATURE)?,
            ),
            cycle_count: self.read_word(command::CYCLE_COUNT)?,
            time_to_empty_min: self.read_word(command::AVERAGE_TIME_TO_EMPTY)?,
        })
    }
}
