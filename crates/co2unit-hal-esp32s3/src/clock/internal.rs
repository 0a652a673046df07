//! Internal clock kept by the low-power RTC counter. It keeps counting
//! through deep sleep and software resets but not through a power cut.

use chrono::{DateTime, NaiveDateTime};
use co2unit_core::board::Clock;
use esp_hal::{peripherals::LPWR, rtc_cntl::Rtc};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InternalClockError {
    OutOfRange,
}

pub struct RtcClock {
    rtc: Rtc<'static>,
}

impl RtcClock {
    /// The watchdog owns the LPWR peripheral; this only touches the time
    /// registers, so it works on a second handle.
    pub fn new() -> Self {
        Self {
            rtc: Rtc::new(unsafe { LPWR::steal() }),
        }
    }
}

impl Default for RtcClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RtcClock {
    type Error = InternalClockError;

    fn now(&mut self) -> Result<NaiveDateTime, Self::Error> {
        let micros = i64::try_from(self.rtc.current_time_us())
            .map_err(|_| InternalClockError::OutOfRange)?;
        DateTime::from_timestamp_micros(micros)
            .map(|t| t.naive_utc())
            .ok_or(InternalClockError::OutOfRange)
    }

    fn set(&mut self, time: NaiveDateTime) -> Result<(), Self::Error> {
        let micros = u64::try_from(time.and_utc().timestamp_micros())
            .map_err(|_| InternalClockError::OutOfRange)?;
        self.rtc.set_current_time_us(micros);
        Ok(())
    }
}
