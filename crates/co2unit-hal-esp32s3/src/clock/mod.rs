//! Wall clocks: the SoC RTC counter and a DS3231 on I2C.

pub mod ds3231;
pub mod internal;
