use core::time::Duration;

use esp_hal::{
    peripherals::LPWR,
    rtc_cntl::{Rtc, sleep::TimerWakeupSource},
};
use log::info;

/// Powers down until the timer fires. The chip comes back through reset,
/// so nothing after this runs.
pub(super) fn enter_deep_sleep(seconds: u32) -> ! {
    info!("power: deep sleep seconds={}", seconds);
    let mut rtc = Rtc::new(unsafe { LPWR::steal() });
    let wake_source = TimerWakeupSource::new(Duration::from_secs(seconds as u64));
    rtc.sleep_deep(&[&wake_source]);
}

pub(super) fn reboot() -> ! {
    info!("power: software reset");
    esp_hal::system::software_reset()
}
