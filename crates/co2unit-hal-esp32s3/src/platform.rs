//! Uptime, delays, the RTC watchdog and the operator button.

use co2unit_core::{board::Platform, boot::ResetCause};
use embassy_time::Timer;
use esp_hal::{
    gpio::Input,
    rtc_cntl::{Rtc, RwdtStage, SocResetReason, reset_reason},
    system::Cpu,
    time::{Duration as HalDuration, Instant},
};
use log::info;

/// Window the episode has between watchdog feeds before the chip resets.
pub const WATCHDOG_TIMEOUT_SECS: u64 = 60;
/// Window while idling after an operator interrupt.
pub const OPERATOR_WATCHDOG_TIMEOUT_SECS: u64 = 30 * 60;

pub fn reset_cause() -> ResetCause {
    let reason = reset_reason(Cpu::ProCpu);
    let cause = match reason {
        Some(SocResetReason::ChipPowerOn) | Some(SocResetReason::SysBrownOut) => {
            ResetCause::PowerOn
        }
        Some(SocResetReason::CoreDeepSleep) => ResetCause::DeepSleepWake,
        Some(SocResetReason::CoreSw) | Some(SocResetReason::Cpu0Sw) => ResetCause::SoftReset,
        Some(SocResetReason::CoreMwdt0)
        | Some(SocResetReason::CoreMwdt1)
        | Some(SocResetReason::CoreRtcWdt)
        | Some(SocResetReason::Cpu0Mwdt0)
        | Some(SocResetReason::Cpu0Mwdt1)
        | Some(SocResetReason::Cpu0RtcWdt)
        | Some(SocResetReason::SysRtcWdt)
        | Some(SocResetReason::SysSuperWdt) => ResetCause::Watchdog,
        _ => ResetCause::Unknown,
    };
    info!("boot: reset_reason={:?} cause={:?}", reason, cause);
    cause
}

pub struct EspPlatform<'d> {
    started: Instant,
    rtc: Rtc<'d>,
    operator_button: Input<'d>,
}

impl<'d> EspPlatform<'d> {
    /// Arms the RTC watchdog. The button interrupts the episode while held
    /// low.
    pub fn new(mut rtc: Rtc<'d>, operator_button: Input<'d>) -> Self {
        rtc.rwdt
            .set_timeout(RwdtStage::Stage0, HalDuration::from_secs(WATCHDOG_TIMEOUT_SECS));
        rtc.rwdt.enable();
        Self {
            started: Instant::now(),
            rtc,
            operator_button,
        }
    }

    /// Widens the watchdog window for an operator session.
    pub fn extend_watchdog_for_operator(&mut self) {
        self.rtc.rwdt.set_timeout(
            RwdtStage::Stage0,
            HalDuration::from_secs(OPERATOR_WATCHDOG_TIMEOUT_SECS),
        );
        self.rtc.rwdt.feed();
    }
}

impl Platform for EspPlatform<'_> {
    fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis()
    }

    async fn delay_ms(&mut self, ms: u32) {
        Timer::after_millis(ms as u64).await;
    }

    fn feed_watchdog(&mut self) {
        self.rtc.rwdt.feed();
    }

    fn cancel_requested(&self) -> bool {
        self.operator_button.is_low()
    }
}
