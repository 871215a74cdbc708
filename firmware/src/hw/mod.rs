//! STM32G0 adapters for the core capability traits.
//!
//! The DS1307 and the fuel gauge share I2C1, so the bus lives in a static
//! blocking mutex and each driver borrows it per transaction.

use core::cell::RefCell;

use embassy_stm32::i2c::I2c;
use embassy_stm32::mode::Blocking;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

pub mod gauge;
pub mod power;
pub mod rtc;

pub use gauge::Bq34z100;
pub use power::Stm32PowerHal;
pub use rtc::Ds1307;

/// I2C1 shared between the clock chip and the fuel gauge.
pub type SharedI2c = Mutex<ThreadModeRawMutex, RefCell<I2c<'static, Blocking>>>;
