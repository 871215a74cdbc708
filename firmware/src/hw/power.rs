//! STM32G0 implementation of the power capability set.
//!
//! Deep sleep is STANDBY with SRAM retention: the core resets on wake and
//! the controller finds its counters in the retained block below. Timer
//! wakes use the RTC wakeup timer on the 1 Hz `ck_spre` clock, pin wakes
//! the WKUPn lines. Rails that must survive standby are latched with the
//! PWR pull-up/pull-down registers. The option bytes must freeze the IWDG
//! in standby, otherwise a long sleep ends in a watchdog reset.

use core::mem::MaybeUninit;
use core::ptr;
use core::time::Duration;

use embassy_stm32::Peri;
use embassy_stm32::gpio::{Input, Output};
use embassy_stm32::pac;
use embassy_stm32::peripherals::IWDG;
use embassy_stm32::rtc::Rtc;
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_time::Instant;
use sensor_core::HardwareFault;
use sensor_core::power::{PowerHal, ResetReason, RetainedPowerState, WakeupCause, WakeupPin};
use sensor_core::sequences::{ALL_RAILS, RAIL_COUNT, Rail, rail_by_id};

/// Longest timeout the IWDG reaches with LSI at 32 kHz and prescaler 256.
pub const MAX_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(32_000);
/// Longest timer wake: 17-bit counter on the 1 Hz clock.
pub const MAX_TIMER_WAKEUP_SECONDS: u64 = 0x2_0000;

const WAKEUP_LINES: usize = 6;

const RETAINED_MAGIC: u32 = 0x5E45_0D0E;
const RETAINED_WORDS: usize = 11;

/// Survives STANDBY because `deep_sleep` sets PWR_CR3.RRS.
#[unsafe(link_section = ".uninit.RETAINED")]
static mut RETAINED: MaybeUninit<[u32; RETAINED_WORDS]> = MaybeUninit::uninit();

#[allow(clippy::cast_possible_truncation)]
const fn split(value: u64) -> (u32, u32) {
    (value as u32, (value >> 32) as u32)
}

fn join(low: u32, high: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

fn checksum(words: &[u32]) -> u32 {
    words
        .iter()
        .fold(RETAINED_MAGIC, |acc, word| acc.rotate_left(5) ^ word)
}

fn encode_retained(state: &RetainedPowerState) -> [u32; RETAINED_WORDS] {
    let (active_lo, active_hi) = split(state.total_active_us);
    let (sleep_lo, sleep_hi) = split(state.total_sleep_us);
    let (pending_lo, pending_hi) = split(state.pending_sleep_us.unwrap_or(0));
    let mut words = [
        RETAINED_MAGIC,
        active_lo,
        active_hi,
        sleep_lo,
        sleep_hi,
        state.sleep_cycles,
        state.wakeup_events,
        u32::from(state.pending_sleep_us.is_some()),
        pending_lo,
        pending_hi,
        0,
    ];
    words[RETAINED_WORDS - 1] = checksum(&words[..RETAINED_WORDS - 1]);
    words
}

fn decode_retained(words: &[u32; RETAINED_WORDS]) -> Option<RetainedPowerState> {
    let (body, sum) = words.split_at(RETAINED_WORDS - 1);
    if body[0] != RETAINED_MAGIC || sum[0] != checksum(body) {
        return None;
    }
    Some(RetainedPowerState {
        total_active_us: join(words[1], words[2]),
        total_sleep_us: join(words[3], words[4]),
        sleep_cycles: words[5],
        wakeup_events: words[6],
        pending_sleep_us: (words[7] != 0).then(|| join(words[8], words[9])),
    })
}

/// Port index and pin number parsed from a catalog name such as `"PB0"`.
fn pin_coordinates(mcu_pin: &str) -> Option<(usize, usize)> {
    let bytes = mcu_pin.as_bytes();
    let (&b'P', rest) = bytes.split_first()? else {
        return None;
    };
    let (&port, digits) = rest.split_first()?;
    let port = usize::from(port.checked_sub(b'A')?);
    let pin = core::str::from_utf8(digits).ok()?.parse::<usize>().ok()?;
    (pin < 16).then_some((port, pin))
}

/// Reads the reset and standby flags left by the previous run, then clears them.
fn take_boot_flags() -> (ResetReason, WakeupCause) {
    let sr1 = pac::PWR.sr1().read();
    let csr = pac::RCC.csr().read();

    let result = if sr1.sbf() {
        let cause = if sr1.wufi() {
            WakeupCause::Timer
        } else if (0..WAKEUP_LINES).any(|line| sr1.wuf(line)) {
            WakeupCause::External
        } else {
            WakeupCause::Unknown
        };
        (ResetReason::DeepSleep, cause)
    } else {
        let reason = if csr.iwdgrstf() {
            ResetReason::OtherWatchdog
        } else if csr.wwdgrstf() {
            ResetReason::TaskWatchdog
        } else if csr.sftrstf() {
            ResetReason::Software
        } else if csr.lpwrrstf() {
            ResetReason::Brownout
        } else if csr.pwrrstf() {
            ResetReason::PowerOn
        } else if csr.pinrstf() {
            ResetReason::External
        } else {
            ResetReason::Unknown
        };
        (reason, WakeupCause::Undefined)
    };

    pac::RCC.csr().modify(|w| w.set_rmvf(true));
    clear_wakeup_flags();
    result
}

fn clear_wakeup_flags() {
    pac::PWR.scr().write(|w| {
        w.set_csbf(true);
        for line in 0..WAKEUP_LINES {
            w.set_cwuf(line, true);
        }
    });
}

/// Programs the RTC wakeup timer for `seconds` on the 1 Hz clock.
#[allow(clippy::cast_possible_truncation)]
fn arm_rtc_wakeup(seconds: u32) {
    let rtc = pac::RTC;
    rtc.wpr().write(|w| w.set_key(0xCA));
    rtc.wpr().write(|w| w.set_key(0x53));
    rtc.cr().modify(|w| w.set_wute(false));
    while !rtc.icsr().read().wutwf() {}

    // WUCKSEL 0b10x counts the 16-bit reload, 0b11x adds 2^16 to it.
    let reload = seconds.saturating_sub(1);
    let (select, reload) = if reload > 0xFFFF {
        (0b110, reload - 0x1_0000)
    } else {
        (0b100, reload)
    };
    rtc.wutr().write(|w| w.set_wut(reload as u16));
    rtc.scr().write(|w| w.set_cwutf(true));
    rtc.cr().modify(|w| {
        w.set_wucksel(pac::rtc::vals::Wucksel::from_bits(select));
        w.set_wutie(true);
        w.set_wute(true);
    });
    rtc.wpr().write(|w| w.set_key(0xFF));
}

fn disarm_rtc_wakeup() {
    let rtc = pac::RTC;
    rtc.wpr().write(|w| w.set_key(0xCA));
    rtc.wpr().write(|w| w.set_key(0x53));
    rtc.cr().modify(|w| {
        w.set_wutie(false);
        w.set_wute(false);
    });
    rtc.wpr().write(|w| w.set_key(0xFF));
}

pub struct Stm32PowerHal {
    /// Enable lines in catalog order.
    rails: [Output<'static>; RAIL_COUNT],
    /// WKUP1 (PA0) sampled during light sleep.
    wake_input: Input<'static>,
    wake_level: Option<bool>,
    /// Keeps the RTC clocked; the wakeup timer is driven through the PAC.
    _rtc: Rtc,
    iwdg: Option<Peri<'static, IWDG>>,
    watchdog: Option<IndependentWatchdog<'static, IWDG>>,
    timer_wakeup: Option<u32>,
    reset_reason: ResetReason,
    wakeup_cause: WakeupCause,
}

impl Stm32PowerHal {
    /// Captures (and clears) the boot flags; call once, right after `hal::init`.
    pub fn new(
        rails: [Output<'static>; RAIL_COUNT],
        wake_input: Input<'static>,
        rtc: Rtc,
        iwdg: Peri<'static, IWDG>,
    ) -> Self {
        let (reset_reason, wakeup_cause) = take_boot_flags();
        Self {
            rails,
            wake_input,
            wake_level: None,
            _rtc: rtc,
            iwdg: Some(iwdg),
            watchdog: None,
            timer_wakeup: None,
            reset_reason,
            wakeup_cause,
        }
    }

    fn output_mut(&mut self, rail: Rail) -> &mut Output<'static> {
        &mut self.rails[rail.as_index()]
    }
}

impl PowerHal for Stm32PowerHal {
    fn monotonic_micros(&self) -> u64 {
        Instant::now().as_micros()
    }

    fn drive_rail(&mut self, rail: Rail, enabled: bool) -> Result<(), HardwareFault> {
        let high = rail_by_id(rail).polarity.level_for(enabled);
        let output = self.output_mut(rail);
        if high {
            output.set_high();
        } else {
            output.set_low();
        }
        Ok(())
    }

    fn rail_enabled(&self, rail: Rail) -> bool {
        let high = self.rails[rail.as_index()].is_set_high();
        rail_by_id(rail).polarity.level_for(true) == high
    }

    fn settle(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        embassy_time::block_for(embassy_time::Duration::from_micros(micros));
    }

    fn hold_rail(&mut self, rail: Rail) -> Result<(), HardwareFault> {
        let line = rail_by_id(rail);
        let (port, pin) = pin_coordinates(line.mcu_pin).ok_or(HardwareFault::GpioConfig)?;
        let high = self.rails[rail.as_index()].is_set_high();
        pac::PWR.pucr(port).modify(|w| w.set_pu(pin, high));
        pac::PWR.pdcr(port).modify(|w| w.set_pd(pin, !high));
        pac::PWR.cr3().modify(|w| w.set_apc(true));
        Ok(())
    }

    fn release_holds(&mut self) -> Result<(), HardwareFault> {
        pac::PWR.cr3().modify(|w| w.set_apc(false));
        for line in &ALL_RAILS {
            let (port, pin) = pin_coordinates(line.mcu_pin).ok_or(HardwareFault::GpioConfig)?;
            pac::PWR.pucr(port).modify(|w| w.set_pu(pin, false));
            pac::PWR.pdcr(port).modify(|w| w.set_pd(pin, false));
        }
        Ok(())
    }

    fn arm_watchdog(&mut self, timeout: Duration) -> Result<(), HardwareFault> {
        if timeout > MAX_WATCHDOG_TIMEOUT {
            return Err(HardwareFault::Watchdog);
        }
        // The IWDG cannot be stopped or re-armed once running.
        let Some(iwdg) = self.iwdg.take() else {
            return Ok(());
        };
        let micros = u32::try_from(timeout.as_micros()).map_err(|_| HardwareFault::Watchdog)?;
        let mut watchdog = IndependentWatchdog::new(iwdg, micros);
        watchdog.unleash();
        self.watchdog = Some(watchdog);
        Ok(())
    }

    fn feed_watchdog(&mut self) -> Result<(), HardwareFault> {
        let watchdog = self.watchdog.as_mut().ok_or(HardwareFault::Watchdog)?;
        watchdog.pet();
        Ok(())
    }

    fn configure_timer_wakeup(&mut self, after: Duration) -> Result<(), HardwareFault> {
        let seconds = after.as_secs() + u64::from(after.subsec_nanos() > 0);
        if seconds == 0 || seconds > MAX_TIMER_WAKEUP_SECONDS {
            return Err(HardwareFault::WakeupConfig);
        }
        self.timer_wakeup = u32::try_from(seconds).ok();
        Ok(())
    }

    fn configure_pin_wakeup(&mut self, pin: WakeupPin) -> Result<(), HardwareFault> {
        let line = match pin.pin {
            1..=6 => usize::from(pin.pin - 1),
            _ => return Err(HardwareFault::WakeupConfig),
        };
        pac::PWR.cr4().modify(|w| w.set_wp(line, !pin.level));
        pac::PWR.cr3().modify(|w| w.set_ewup(line, true));
        if line == 0 {
            self.wake_level = Some(pin.level);
        }
        Ok(())
    }

    fn clear_wakeup_sources(&mut self) {
        self.timer_wakeup = None;
        self.wake_level = None;
        pac::PWR.cr3().modify(|w| {
            for line in 0..WAKEUP_LINES {
                w.set_ewup(line, false);
            }
        });
        disarm_rtc_wakeup();
    }

    fn deep_sleep(&mut self, duration: Duration) {
        defmt::debug!("standby requested for {}s", duration.as_secs());
        if let Some(seconds) = self.timer_wakeup {
            arm_rtc_wakeup(seconds);
        }
        clear_wakeup_flags();
        pac::PWR.cr3().modify(|w| {
            w.set_rrs(true);
            w.set_eiwul(true);
        });
        pac::PWR
            .cr1()
            .modify(|w| w.set_lpms(pac::pwr::vals::Lpms::from_bits(0b011)));

        // SAFETY: the executor is not touched again; standby ends in a reset.
        let mut core = unsafe { cortex_m::Peripherals::steal() };
        core.SCB.set_sleepdeep();
        loop {
            cortex_m::asm::dsb();
            cortex_m::asm::wfi();
        }
    }

    fn light_sleep(&mut self, duration: Duration) -> WakeupCause {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let deadline = Instant::now()
            .checked_add(embassy_time::Duration::from_micros(micros))
            .unwrap_or(Instant::MAX);
        let cause = loop {
            if let Some(level) = self.wake_level
                && self.wake_input.is_high() == level
            {
                break WakeupCause::External;
            }
            if Instant::now() >= deadline {
                break WakeupCause::Timer;
            }
            // The time driver's overflow interrupt bounds each wait.
            cortex_m::asm::wfi();
        };
        self.wakeup_cause = cause;
        cause
    }

    fn wakeup_cause(&self) -> WakeupCause {
        self.wakeup_cause
    }

    fn reset_reason(&self) -> ResetReason {
        self.reset_reason
    }

    fn store_retained(&mut self, state: &RetainedPowerState) -> Result<(), HardwareFault> {
        let words = encode_retained(state);
        // SAFETY: single-threaded access from the cycle task.
        unsafe { ptr::write_volatile(RETAINED.as_mut_ptr(), words) };
        Ok(())
    }

    fn load_retained(&mut self) -> Option<RetainedPowerState> {
        // SAFETY: any bit pattern is a valid `[u32; N]`; the checksum rejects
        // what a cold boot leaves behind.
        let words = unsafe { ptr::read_volatile(RETAINED.as_ptr()) };
        decode_retained(&words)
    }
}
