use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::rcc::LsConfig;
use embassy_stm32::rtc::{Rtc, RtcConfig};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::Mutex;
use sensor_core::sequences::{Rail, rail_by_id};
use static_cell::StaticCell;

use crate::hw::{Bq34z100, Ds1307, SharedI2c, Stm32PowerHal};
use crate::scan::ScanQueue;

mod cycle_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) static SCAN_QUEUE: ScanQueue = ScanQueue::new();
static I2C_BUS: StaticCell<SharedI2c> = StaticCell::new();

/// Enable line for `rail`, created at its "off" level.
fn rail_output<'d>(rail: Rail, pin: hal::Peri<'d, impl hal::gpio::Pin>) -> Output<'d> {
    let level = Level::from(rail_by_id(rail).polarity.level_for(false));
    Output::new(pin, level, Speed::Low)
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let mut config = hal::Config::default();
    config.rcc.ls = LsConfig::default_lsi();
    let hal::Peripherals {
        PA0,
        PB0,
        PB4,
        PB5,
        PB6,
        PB8,
        PB9,
        PC6,
        PC7,
        I2C1,
        IWDG,
        RTC,
        ..
    } = hal::init(config);

    // Catalog order: 5V, WiFi, BLE, cellular, SD card, sensors.
    let rails = [
        rail_output(Rail::External5V, PB0),
        rail_output(Rail::Wifi, PC6),
        rail_output(Rail::Bluetooth, PC7),
        rail_output(Rail::Cellular, PB4),
        rail_output(Rail::SdCard, PB5),
        rail_output(Rail::Sensors, PB6),
    ];
    let wake_input = Input::new(PA0, Pull::Down);
    let rtc = Rtc::new(RTC, RtcConfig::default());
    let power_hal = Stm32PowerHal::new(rails, wake_input, rtc, IWDG);

    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = Hertz(100_000);
    let bus: &'static SharedI2c = I2C_BUS.init(Mutex::new(RefCell::new(I2c::new_blocking(
        I2C1, PB8, PB9, i2c_config,
    ))));

    spawner
        .spawn(cycle_task::run(
            power_hal,
            Ds1307::new(bus),
            Bq34z100::new(bus),
            &SCAN_QUEUE,
        ))
        .expect("failed to spawn cycle task");

    core::future::pending::<()>().await;
}
