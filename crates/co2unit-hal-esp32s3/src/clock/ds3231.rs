//! Battery-backed DS3231 real-time clock, kept in 24-hour UTC.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use co2unit_core::board::Clock;
use embedded_hal::i2c::I2c;

const DS3231_ADDR: u8 = 0x68;
const REG_SECONDS: u8 = 0x00;
const REG_STATUS: u8 = 0x0F;

const HOURS_12H: u8 = 0x40;
const HOURS_PM: u8 = 0x20;
const MONTH_CENTURY: u8 = 0x80;
/// Oscillator stop flag: the chip lost its battery at some point.
const STATUS_OSF: u8 = 0x80;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Ds3231Error<E> {
    I2c(E),
    OscillatorStopped,
    InvalidTime,
}

fn bcd_to_bin(v: u8) -> u8 {
    (v >> 4) * 10 + (v & 0x0F)
}

fn bin_to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

pub struct Ds3231<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> Ds3231<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    fn read_status(&mut self) -> Result<u8, Ds3231Error<I2C::Error>> {
        let mut status = [0u8; 1];
        self.i2c
            .write_read(DS3231_ADDR, &[REG_STATUS], &mut status)
            .map_err(Ds3231Error::I2c)?;
        Ok(status[0])
    }
}

fn decode(regs: &[u8; 7]) -> Option<NaiveDateTime> {
    let seconds = bcd_to_bin(regs[0] & 0x7F);
    let minutes = bcd_to_bin(regs[1] & 0x7F);
    let hours = if regs[2] & HOURS_12H != 0 {
        let hour12 = bcd_to_bin(regs[2] & 0x1F) % 12;
        if regs[2] & HOURS_PM != 0 { hour12 + 12 } else { hour12 }
    } else {
        bcd_to_bin(regs[2] & 0x3F)
    };
    let day = bcd_to_bin(regs[4] & 0x3F);
    let month = bcd_to_bin(regs[5] & 0x1F);
    let century = if regs[5] & MONTH_CENTURY != 0 { 100 } else { 0 };
    let year = 2000 + century + bcd_to_bin(regs[6]) as i32;

    NaiveDate::from_ymd_opt(year, month as u32, day as u32)?.and_hms_opt(
        hours as u32,
        minutes as u32,
        seconds as u32,
    )
}

fn encode(time: &NaiveDateTime) -> Option<[u8; 7]> {
    let year = time.year();
    if !(2000..2200).contains(&year) {
        return None;
    }
    let century = if year >= 2100 { MONTH_CENTURY } else { 0 };
    Some([
        bin_to_bcd(time.second() as u8),
        bin_to_bcd(time.minute() as u8),
        bin_to_bcd(time.hour() as u8),
        time.weekday().number_from_monday() as u8,
        bin_to_bcd(time.day() as u8),
        bin_to_bcd(time.month() as u8) | century,
        bin_to_bcd((year % 100) as u8),
    ])
}

impl<I2C: I2c> Clock for Ds3231<I2C> {
    type Error = Ds3231Error<I2C::Error>;

    fn now(&mut self) -> Result<NaiveDateTime, Self::Error> {
        if self.read_status()? & STATUS_OSF != 0 {
            return Err(Ds3231Error::OscillatorStopped);
        }
        let mut regs = [0u8; 7];
        self.i2c
            .write_read(DS3231_ADDR, &[REG_SECONDS], &mut regs)
            .map_err(Ds3231Error::I2c)?;
        decode(&regs).ok_or(Ds3231Error::InvalidTime)
    }

    fn set(&mut self, time: NaiveDateTime) -> Result<(), Self::Error> {
        let regs = encode(&time).ok_or(Ds3231Error::InvalidTime)?;
        let mut frame = [0u8; 8];
        frame[0] = REG_SECONDS;
        frame[1..].copy_from_slice(&regs);
        self.i2c
            .write(DS3231_ADDR, &frame)
            .map_err(Ds3231Error::I2c)?;

        let status = self.read_status()?;
        if status & STATUS_OSF != 0 {
            self.i2c
                .write(DS3231_ADDR, &[REG_STATUS, status & !STATUS_OSF])
                .map_err(Ds3231Error::I2c)?;
        }
        Ok(())
    }
}
