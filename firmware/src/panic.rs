//! Panic handler: report over RTT, then trap so an attached probe halts.
//!
//! A detached node resets through the watchdog, which the next boot reports
//! as a watchdog reset reason.

use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let message = defmt::Display2Format(&info.message());
    match info.location() {
        Some(location) => {
            defmt::error!(
                "panic at {}:{}: {}",
                location.file(),
                location.line(),
                message
            );
        }
        None => defmt::error!("panic: {}", message),
    }
    cortex_m::asm::udf();
}
