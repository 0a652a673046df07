//! SD card [`FileSystem`] over `embedded-sdmmc` in SPI mode.
//!
//! FAT 8.3 names only; names are matched case-insensitively by the driver.
//! The volume is opened per operation so a card swapped between episodes
//! is picked up, and nothing stays open across a deep sleep.

use alloc::{string::String, vec::Vec};

use chrono::{Datelike, NaiveDateTime, Timelike};
use co2unit_core::fs::{FileSystem, FsError, split_parent};
use embedded_hal::{
    delay::DelayNs,
    digital::OutputPin,
    spi::{Error as SpiErrorTrait, ErrorKind, ErrorType, Operation, SpiBus, SpiDevice},
};
use embedded_sdmmc::{
    Directory, Mode, SdCard, SdCardError, ShortFileName, TimeSource, Timestamp, VolumeIdx,
    VolumeManager,
};
use log::{debug, warn};

const COPY_CHUNK: usize = 512;

/// Stamps every file written this episode with the boot time.
#[derive(Clone, Copy, Debug)]
pub struct BootTimeSource {
    stamp: Timestamp,
}

impl BootTimeSource {
    pub fn new(now: Option<NaiveDateTime>) -> Self {
        let stamp = now
            .filter(|t| (1980..2100).contains(&t.year()))
            .map(|t| Timestamp {
                year_since_1970: (t.year() - 1970) as u8,
                zero_indexed_month: t.month0() as u8,
                zero_indexed_day: t.day0() as u8,
                hours: t.hour() as u8,
                minutes: t.minute() as u8,
                seconds: t.second() as u8,
            })
            .unwrap_or(Timestamp {
                year_since_1970: 10,
                zero_indexed_month: 0,
                zero_indexed_day: 0,
                hours: 0,
                minutes: 0,
                seconds: 0,
            });
        Self { stamp }
    }
}

impl TimeSource for BootTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        self.stamp
    }
}

#[derive(Debug)]
pub enum ExclusiveSpiError<BusErr, CsErr>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    Bus(BusErr),
    Cs(CsErr),
    DelayNotSupported,
}

impl<BusErr, CsErr> SpiErrorTrait for ExclusiveSpiError<BusErr, CsErr>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Owns the SD bus and its chip select; the card is the only device on it.
pub struct ExclusiveSpiDevice<BUS, CS> {
    bus: BUS,
    cs: CS,
}

impl<BUS, CS> ErrorType for ExclusiveSpiDevice<BUS, CS>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    type Error = ExclusiveSpiError<BUS::Error, CS::Error>;
}

impl<BUS, CS> SpiDevice<u8> for ExclusiveSpiDevice<BUS, CS>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        if operations
            .iter()
            .any(|op| matches!(op, Operation::DelayNs(_)))
        {
            return Err(ExclusiveSpiError::DelayNotSupported);
        }

        self.cs.set_low().map_err(ExclusiveSpiError::Cs)?;
        let mut result = Ok(());
        for operation in operations.iter_mut() {
            result = match operation {
                Operation::Read(buf) => self.bus.read(buf),
                Operation::Write(buf) => self.bus.write(buf),
                Operation::Transfer(read, write) => self.bus.transfer(read, write),
                Operation::TransferInPlace(buf) => self.bus.transfer_in_place(buf),
                Operation::DelayNs(_) => Ok(()),
            }
            .map_err(ExclusiveSpiError::Bus);
            if result.is_err() {
                break;
            }
        }
        let flushed = self.bus.flush().map_err(ExclusiveSpiError::Bus);
        self.cs.set_high().map_err(ExclusiveSpiError::Cs)?;
        result.and(flushed)
    }
}

type Card<BUS, CS, DELAY> = SdCard<ExclusiveSpiDevice<BUS, CS>, DELAY>;
type Dir<'a, BUS, CS, DELAY> = Directory<'a, Card<BUS, CS, DELAY>, BootTimeSource, 4, 4, 1>;
type SdError = embedded_sdmmc::Error<SdCardError>;

fn map_error(err: SdError) -> FsError {
    match err {
        embedded_sdmmc::Error::NotFound => FsError::NotFound,
        embedded_sdmmc::Error::DeviceError(err) => {
            warn!("sd: card error err={:?}", err);
            FsError::NoCard
        }
        embedded_sdmmc::Error::Unsupported => FsError::Unsupported,
        err => {
            warn!("sd: filesystem error err={:?}", err);
            FsError::Io
        }
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

fn short_file_name_to_string(name: &ShortFileName) -> String {
    let mut out = String::new();
    out.push_str(core::str::from_utf8(name.base_name()).unwrap_or_default());
    let ext = core::str::from_utf8(name.extension()).unwrap_or_default();
    if !ext.is_empty() {
        out.push('.');
        out.push_str(ext);
    }
    out
}

pub struct SdFileSystem<BUS, CS, DELAY>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    DELAY: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    volume_mgr: VolumeManager<Card<BUS, CS, DELAY>, BootTimeSource, 4, 4, 1>,
}

impl<BUS, CS, DELAY> SdFileSystem<BUS, CS, DELAY>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    DELAY: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    /// Clocks the card into SPI mode. A missing card only shows up on the
    /// first filesystem call, as [`FsError::NoCard`].
    pub fn new(mut bus: BUS, mut cs: CS, delay: DELAY, time: BootTimeSource) -> Self {
        // SD SPI init requires >=74 clock cycles with CS deasserted.
        let _ = cs.set_high();
        if let Err(err) = bus.write(&[0xFFu8; 10]) {
            warn!("sd: preclock failed err={:?}", err);
        }

        let card = SdCard::new(ExclusiveSpiDevice { bus, cs }, delay);
        Self {
            volume_mgr: VolumeManager::new(card, time),
        }
    }

    /// Runs `op` on the directory at `dir`, opened from the root.
    fn in_dir<R>(
        &mut self,
        dir: &str,
        op: impl FnOnce(&mut Dir<'_, BUS, CS, DELAY>) -> Result<R, SdError>,
    ) -> Result<R, FsError> {
        let mut volume = self.volume_mgr.open_volume(VolumeIdx(0)).map_err(map_error)?;
        let mut current = volume.open_root_dir().map_err(map_error)?;
        for part in components(dir) {
            let next = current.open_dir(part).map_err(map_error)?;
            current = next;
        }
        op(&mut current).map_err(map_error)
    }

    fn copy_file(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        let size = self.file_size(from)?;
        self.write_file(to, &[])?;
        let mut buf = [0u8; COPY_CHUNK];
        let mut offset = 0u32;
        while offset < size {
            let n = self.read_at(from, offset, &mut buf)?;
            if n == 0 {
                return Err(FsError::Io);
            }
            self.append(to, &buf[..n])?;
            offset += n as u32;
        }
        Ok(())
    }
}

impl<BUS, CS, DELAY> FileSystem for SdFileSystem<BUS, CS, DELAY>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    DELAY: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    fn list_dir(&mut self, dir: &str) -> Result<Vec<String>, FsError> {
        self.in_dir(dir, |d| {
            let mut names = Vec::new();
            d.iterate_dir(|entry| {
                if entry.attributes.is_volume() {
                    return;
                }
                let name = short_file_name_to_string(&entry.name);
                if name != "." && name != ".." {
                    names.push(name);
                }
            })?;
            Ok(names)
        })
    }

    fn is_dir(&mut self, path: &str) -> Result<bool, FsError> {
        if components(path).next().is_none() {
            // Root; probe the card so a missing one still reports NoCard.
            return self.in_dir("", |_| Ok(true));
        }
        let (parent, name) = split_parent(path);
        self.in_dir(parent, |d| {
            d.find_directory_entry(name)
                .map(|entry| entry.attributes.is_directory())
        })
    }

    fn file_size(&mut self, path: &str) -> Result<u32, FsError> {
        let (parent, name) = split_parent(path);
        let entry = self.in_dir(parent, |d| d.find_directory_entry(name))?;
        if entry.attributes.is_directory() {
            return Err(FsError::NotFound);
        }
        Ok(entry.size)
    }

    fn read_at(&mut self, path: &str, offset: u32, buf: &mut [u8]) -> Result<usize, FsError> {
        let (parent, name) = split_parent(path);
        self.in_dir(parent, |d| {
            let mut file = d.open_file_in_dir(name, Mode::ReadOnly)?;
            if offset >= file.length() {
                return Ok(0);
            }
            file.seek_from_start(offset)?;

            let mut read_total = 0usize;
            while read_total < buf.len() && !file.is_eof() {
                let read_now = file.read(&mut buf[read_total..])?;
                if read_now == 0 {
                    break;
                }
                read_total += read_now;
            }
            file.close()?;
            Ok(read_total)
        })
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let (parent, name) = split_parent(path);
        self.in_dir(parent, |d| {
            let mut file = d.open_file_in_dir(name, Mode::ReadWriteCreateOrTruncate)?;
            file.write(data)?;
            file.close()
        })
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let (parent, name) = split_parent(path);
        self.in_dir(parent, |d| {
            let mut file = d.open_file_in_dir(name, Mode::ReadWriteCreateOrAppend)?;
            file.write(data)?;
            file.close()
        })
    }

    fn create_dir_all(&mut self, path: &str) -> Result<(), FsError> {
        let mut volume = self.volume_mgr.open_volume(VolumeIdx(0)).map_err(map_error)?;
        let mut current = volume.open_root_dir().map_err(map_error)?;
        for part in components(path) {
            let next = match current.open_dir(part) {
                Ok(dir) => dir,
                Err(embedded_sdmmc::Error::NotFound) => {
                    debug!("sd: mkdir name={} in={}", part, path);
                    current.make_dir_in_dir(part).map_err(map_error)?;
                    current.open_dir(part).map_err(map_error)?
                }
                Err(err) => return Err(map_error(err)),
            };
            current = next;
        }
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<(), FsError> {
        let (parent, name) = split_parent(path);
        self.in_dir(parent, |d| d.delete_file_in_dir(name))
    }

    fn remove_dir_all(&mut self, path: &str) -> Result<(), FsError> {
        warn!("sd: directory removal unsupported path={}", path);
        Err(FsError::Unsupported)
    }

    /// Files are copied then deleted; directories cannot be moved.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        if self.is_dir(from)? {
            warn!("sd: directory rename unsupported from={} to={}", from, to);
            return Err(FsError::Unsupported);
        }
        if self.exists(to)? {
            self.remove_file(to)?;
        }
        self.copy_file(from, to)?;
        self.remove_file(from)
    }
}
