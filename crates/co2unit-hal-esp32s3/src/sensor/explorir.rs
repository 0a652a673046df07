//! ExplorIR serial CO2 sensor in polling mode.
//!
//! Commands and replies are ASCII lines: `K 2` selects polling mode and is
//! echoed as ` K 00002`; `Z` returns the filtered reading as ` Z 01234`,
//! which is scaled by the sensor's multiplier to get ppm.

use alloc::vec::Vec;

use co2unit_core::board::{Reading, Sensors};
use embedded_hal::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};
use heapless::String;
use log::{debug, info, warn};

const MODE_POLLING: u32 = 2;
/// Reads per measurement. The first couple after power-up are usually
/// pinned at 0 or full scale; they are kept so the row shows the settle.
pub const READS_PER_MEASUREMENT: usize = 10;
const READ_INTERVAL_MS: u32 = 500;
const BOOT_SETTLE_MS: u32 = 200;
const REPLY_TIMEOUT_MS: u32 = 100;
const LINE_CAP: usize = 32;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExplorIrError<E> {
    Uart(E),
    Timeout,
    /// Reply did not match the command, or the sensor answered ` ?`.
    BadReply,
    /// No read of the measurement succeeded.
    NoReading,
}

pub struct ExplorIr<UART, DELAY> {
    uart: UART,
    delay: DELAY,
    scale: u32,
}

impl<UART, DELAY> ExplorIr<UART, DELAY>
where
    UART: Read + Write + ReadReady,
    DELAY: DelayNs,
{
    pub fn new(uart: UART, delay: DELAY, scale: u32) -> Self {
        Self { uart, delay, scale }
    }

    fn command(&mut self, cmd: &[u8]) -> Result<String<LINE_CAP>, ExplorIrError<UART::Error>> {
        self.uart.write_all(cmd).map_err(ExplorIrError::Uart)?;
        self.uart.write_all(b"\r\n").map_err(ExplorIrError::Uart)?;
        self.uart.flush().map_err(ExplorIrError::Uart)?;
        let line = self.read_line()?;
        debug!("co2: cmd={:?} reply={}", cmd, line.as_str());
        if line.starts_with(" ?") {
            return Err(ExplorIrError::BadReply);
        }
        Ok(line)
    }

    fn read_line(&mut self) -> Result<String<LINE_CAP>, ExplorIrError<UART::Error>> {
        let mut line = String::new();
        let mut waited_ms = 0;
        loop {
            if !self.uart.read_ready().map_err(ExplorIrError::Uart)? {
                if waited_ms >= REPLY_TIMEOUT_MS {
                    return Err(ExplorIrError::Timeout);
                }
                self.delay.delay_ms(1);
                waited_ms += 1;
                continue;
            }
            let mut byte = [0u8; 1];
            if self.uart.read(&mut byte).map_err(ExplorIrError::Uart)? == 0 {
                continue;
            }
            match byte[0] {
                b'\n' => return Ok(line),
                b'\r' => {}
                b => {
                    if line.push(b as char).is_err() {
                        return Err(ExplorIrError::BadReply);
                    }
                }
            }
        }
    }

    /// Parses the five-digit field of a ` X 01234` reply to `letter`.
    fn field(line: &str, letter: char) -> Option<u32> {
        let rest = line.strip_prefix(' ')?.strip_prefix(letter)?.strip_prefix(' ')?;
        rest.get(..5)?.parse().ok()
    }

    fn set_polling_mode(&mut self) -> Result<(), ExplorIrError<UART::Error>> {
        let line = self.command(b"K 2")?;
        match Self::field(&line, 'K') {
            Some(MODE_POLLING) => Ok(()),
            _ => Err(ExplorIrError::BadReply),
        }
    }

    fn read_co2(&mut self) -> Result<u32, ExplorIrError<UART::Error>> {
        let line = self.command(b"Z")?;
        Self::field(&line, 'Z')
            .map(|z| z * self.scale)
            .ok_or(ExplorIrError::BadReply)
    }
}

impl<UART, DELAY> Sensors for ExplorIr<UART, DELAY>
where
    UART: Read + Write + ReadReady,
    DELAY: DelayNs,
{
    type Error = ExplorIrError<UART::Error>;

    fn probe(&mut self) -> Result<(), Self::Error> {
        self.delay.delay_ms(BOOT_SETTLE_MS);
        self.set_polling_mode()?;
        self.read_co2().map(|_| ())
    }

    fn read(&mut self) -> Result<Reading, Self::Error> {
        self.delay.delay_ms(BOOT_SETTLE_MS);
        if let Err(err) = self.set_polling_mode() {
            warn!("co2: polling mode not acknowledged err={:?}", err);
        }

        let mut co2_ppm = Vec::with_capacity(READS_PER_MEASUREMENT);
        for i in 0..READS_PER_MEASUREMENT {
            if i > 0 {
                self.delay.delay_ms(READ_INTERVAL_MS);
            }
            match self.read_co2() {
                Ok(ppm) => {
                    info!("co2: reading index={} ppm={}", i, ppm);
                    co2_ppm.push(ppm);
                }
                Err(err) => warn!("co2: read failed index={} err={:?}", i, err),
            }
        }

        if co2_ppm.is_empty() {
            return Err(ExplorIrError::NoReading);
        }
        Ok(Reading {
            co2_ppm,
            temperature_c: None,
        })
    }
}
