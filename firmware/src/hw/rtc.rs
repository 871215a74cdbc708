//! DS1307 register access over the shared I2C bus.

use heapless::Vec;
use sensor_core::HardwareFault;
use sensor_core::clock::RtcBus;
use sensor_core::clock::registers::RAM_SIZE;

use super::SharedI2c;

/// Fixed 7-bit address of the DS1307.
pub const DS1307_ADDRESS: u8 = 0x68;

/// Register pointer byte plus the largest block the chip exposes.
const MAX_WRITE: usize = 1 + 8 + RAM_SIZE;

pub struct Ds1307 {
    bus: &'static SharedI2c,
}

impl Ds1307 {
    pub const fn new(bus: &'static SharedI2c) -> Self {
        Self { bus }
    }
}

impl RtcBus for Ds1307 {
    fn read_registers(&mut self, start: u8, buffer: &mut [u8]) -> Result<(), HardwareFault> {
        self.bus.lock(|cell| {
            cell.borrow_mut()
                .blocking_write_read(DS1307_ADDRESS, &[start], buffer)
                .map_err(|_| HardwareFault::Bus)
        })
    }

    fn write_registers(&mut self, start: u8, data: &[u8]) -> Result<(), HardwareFault> {
        let mut frame: Vec<u8, MAX_WRITE> = Vec::new();
        frame.push(start).map_err(|_| HardwareFault::Bus)?;
        frame
            .extend_from_slice(data)
            .map_err(|_| HardwareFault::Bus)?;
        self.bus.lock(|cell| {
            cell.borrow_mut()
                .blocking_write(DS1307_ADDRESS, &frame)
                .map_err(|_| HardwareFault::Bus)
        })
    }
}
