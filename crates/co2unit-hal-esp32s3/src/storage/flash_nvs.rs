//! Flash-backed [`NvStore`] in the last two sectors of the data partition.
//!
//! Each sector starts with a 32-byte header followed by 32-byte records.
//! Records are only ever appended; the last one for a key wins. When the
//! active sector is full the live keys are copied into the other sector,
//! whose header is written last with the next generation number, so a reset
//! during compaction leaves the old sector in charge.
//!
//! Record layout (little endian):
//!
//! | bytes  | field                          |
//! |--------|--------------------------------|
//! | 0      | key length                     |
//! | 1      | flags (0 = set, 1 = erase)     |
//! | 2..4   | reserved, 0xFF                 |
//! | 4..8   | value                          |
//! | 8..28  | key, padded with 0xFF          |
//! | 28..32 | FNV-1a checksum of bytes 0..28 |

use alloc::{collections::BTreeMap, string::String};

use co2unit_core::nvs::NvStore;
use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use esp_rom_sys::rom::spiflash::{
    ESP_ROM_SPIFLASH_RESULT_OK, esp_rom_spiflash_erase_sector, esp_rom_spiflash_read,
    esp_rom_spiflash_unlock, esp_rom_spiflash_write,
};
use log::{debug, info, warn};

const FLASH_SECTOR_SIZE: u32 = 4096;
const DEFAULT_FLASH_CAPACITY_BYTES: usize = 16 * 1024 * 1024;

const STORE_MAGIC: u32 = 0x564E_3243; // "C2NV"
const HEADER_LEN: u32 = 32;
const RECORD_LEN: usize = 32;
const RECORD_SLOTS: u32 = (FLASH_SECTOR_SIZE - HEADER_LEN) / RECORD_LEN as u32;
const CHECKSUM_AT: usize = RECORD_LEN - 4;

const FLAG_SET: u8 = 0;
const FLAG_ERASE: u8 = 1;

pub const MAX_KEY_LEN: usize = 20;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NvsFlashError {
    PartitionTable,
    PartitionMissing,
    PartitionTooSmall,
    FlashOpFailed(i32),
    Unsupported,
    KeyTooLong,
    /// More live keys than one sector holds.
    StoreFull,
}

#[derive(Debug)]
struct RawFlash;

impl RawFlash {
    fn new() -> Result<Self, NvsFlashError> {
        let rc = unsafe { esp_rom_spiflash_unlock() };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(NvsFlashError::FlashOpFailed(rc));
        }
        Ok(Self)
    }

    fn erase_sector(&mut self, sector_addr: u32) -> Result<(), NvsFlashError> {
        if !sector_addr.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(NvsFlashError::Unsupported);
        }
        let rc = unsafe { esp_rom_spiflash_erase_sector(sector_addr / FLASH_SECTOR_SIZE) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(NvsFlashError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, NvsFlashError> {
        let mut word = 0u32;
        let rc = unsafe { esp_rom_spiflash_read(addr, &mut word as *mut u32 as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(NvsFlashError::FlashOpFailed(rc));
        }
        Ok(word)
    }

    /// Reads any byte range. The ROM only reads whole aligned words.
    fn read_bytes(&mut self, addr: u32, out: &mut [u8]) -> Result<(), NvsFlashError> {
        let start = addr & !0b11;
        let mut skip = (addr - start) as usize;
        let mut filled = 0usize;
        let mut word_addr = start;
        while filled < out.len() {
            let word = self.read_word(word_addr)?.to_le_bytes();
            for byte in &word[skip..] {
                if filled == out.len() {
                    break;
                }
                out[filled] = *byte;
                filled += 1;
            }
            skip = 0;
            word_addr += 4;
        }
        Ok(())
    }

    /// Programs erased flash. `addr` and `data.len()` must be word aligned.
    fn write_words(&mut self, addr: u32, data: &[u8]) -> Result<(), NvsFlashError> {
        if !addr.is_multiple_of(4) || !data.len().is_multiple_of(4) {
            return Err(NvsFlashError::Unsupported);
        }
        for (i, chunk) in data.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let rc = unsafe { esp_rom_spiflash_write(addr + 4 * i as u32, &word as *const u32, 4) };
            if rc != ESP_ROM_SPIFLASH_RESULT_OK {
                return Err(NvsFlashError::FlashOpFailed(rc));
            }
        }
        Ok(())
    }
}

impl ReadStorage for RawFlash {
    type Error = NvsFlashError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.read_bytes(offset, bytes)
    }

    fn capacity(&self) -> usize {
        DEFAULT_FLASH_CAPACITY_BYTES
    }
}

// The partition table reader wants `Storage`; nothing here writes through it.
impl Storage for RawFlash {
    fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), Self::Error> {
        Err(NvsFlashError::Unsupported)
    }
}

/// Prefers an undefined data partition and falls back to the first NVS one.
fn find_data_partition(flash: &mut RawFlash) -> Result<(u32, u32), NvsFlashError> {
    let mut table_buf = [0u8; PARTITION_TABLE_MAX_LEN];
    let table =
        read_partition_table(flash, &mut table_buf).map_err(|_| NvsFlashError::PartitionTable)?;

    let mut fallback_nvs = None;
    for entry in table.iter() {
        if entry.is_read_only() || entry.len() < 2 * FLASH_SECTOR_SIZE {
            continue;
        }
        match entry.partition_type() {
            PartitionType::Data(DataPartitionSubType::Undefined) => {
                return Ok((entry.offset(), entry.len()));
            }
            PartitionType::Data(DataPartitionSubType::Nvs) if fallback_nvs.is_none() => {
                fallback_nvs = Some((entry.offset(), entry.len()));
            }
            _ => {}
        }
    }
    fallback_nvs.ok_or(NvsFlashError::PartitionMissing)
}

fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C_9DC5u32;
    for byte in bytes {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

fn seal(raw: &mut [u8; RECORD_LEN]) {
    let sum = checksum32(&raw[..CHECKSUM_AT]);
    raw[CHECKSUM_AT..].copy_from_slice(&sum.to_le_bytes());
}

fn is_sealed(raw: &[u8; RECORD_LEN]) -> bool {
    let stored = u32::from_le_bytes([
        raw[CHECKSUM_AT],
        raw[CHECKSUM_AT + 1],
        raw[CHECKSUM_AT + 2],
        raw[CHECKSUM_AT + 3],
    ]);
    stored == checksum32(&raw[..CHECKSUM_AT])
}

fn encode_record(key: &str, value: Option<u32>) -> Result<[u8; RECORD_LEN], NvsFlashError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(NvsFlashError::KeyTooLong);
    }
    let mut raw = [0xFFu8; RECORD_LEN];
    raw[0] = key.len() as u8;
    raw[1] = if value.is_some() { FLAG_SET } else { FLAG_ERASE };
    raw[4..8].copy_from_slice(&value.unwrap_or(u32::MAX).to_le_bytes());
    raw[8..8 + key.len()].copy_from_slice(key.as_bytes());
    seal(&mut raw);
    Ok(raw)
}

fn decode_record(raw: &[u8; RECORD_LEN]) -> Option<(String, Option<u32>)> {
    if !is_sealed(raw) {
        return None;
    }
    let key_len = raw[0] as usize;
    if key_len == 0 || key_len > MAX_KEY_LEN {
        return None;
    }
    let key = core::str::from_utf8(&raw[8..8 + key_len]).ok()?;
    let value = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    match raw[1] {
        FLAG_SET => Some((String::from(key), Some(value))),
        FLAG_ERASE => Some((String::from(key), None)),
        _ => None,
    }
}

fn record_addr(sector: u32, slot: u32) -> u32 {
    sector + HEADER_LEN + slot * RECORD_LEN as u32
}

#[derive(Debug)]
pub struct FlashNvStore {
    flash: RawFlash,
    sectors: [u32; 2],
    active: usize,
    generation: u32,
    next_slot: u32,
    cache: BTreeMap<String, u32>,
}

impl FlashNvStore {
    /// Locates the store and replays its records. A store with no valid
    /// header in either sector is formatted.
    pub fn new() -> Result<Self, NvsFlashError> {
        let mut flash = RawFlash::new()?;
        let (offset, len) = find_data_partition(&mut flash)?;
        if len < 2 * FLASH_SECTOR_SIZE {
            return Err(NvsFlashError::PartitionTooSmall);
        }
        let first = offset + len - 2 * FLASH_SECTOR_SIZE;

        let mut store = Self {
            flash,
            sectors: [first, first + FLASH_SECTOR_SIZE],
            active: 0,
            generation: 0,
            next_slot: 0,
            cache: BTreeMap::new(),
        };
        store.mount()?;
        Ok(store)
    }

    fn mount(&mut self) -> Result<(), NvsFlashError> {
        let (active, generation) = match (self.read_header(0)?, self.read_header(1)?) {
            (Some(a), Some(b)) if b > a => (1, b),
            (Some(a), _) => (0, a),
            (None, Some(b)) => (1, b),
            (None, None) => {
                info!("nvs: formatting sector={:#x}", self.sectors[0]);
                self.flash.erase_sector(self.sectors[0])?;
                self.write_header(0, 1)?;
                (0, 1)
            }
        };
        self.active = active;
        self.generation = generation;
        self.replay()
    }

    fn replay(&mut self) -> Result<(), NvsFlashError> {
        self.cache.clear();
        self.next_slot = RECORD_SLOTS;
        let sector = self.sectors[self.active];
        for slot in 0..RECORD_SLOTS {
            let mut raw = [0u8; RECORD_LEN];
            self.flash.read_bytes(record_addr(sector, slot), &mut raw)?;
            if raw.iter().all(|b| *b == 0xFF) {
                self.next_slot = slot;
                break;
            }
            match decode_record(&raw) {
                Some((key, Some(value))) => {
                    self.cache.insert(key, value);
                }
                Some((key, None)) => {
                    self.cache.remove(&key);
                }
                // A reset mid-write leaves a torn slot; it stays burnt.
                None => warn!("nvs: torn record skipped slot={}", slot),
            }
        }
        info!(
            "nvs: mounted generation={} keys={} used_slots={}",
            self.generation,
            self.cache.len(),
            self.next_slot
        );
        Ok(())
    }

    fn read_header(&mut self, index: usize) -> Result<Option<u32>, NvsFlashError> {
        let mut raw = [0u8; RECORD_LEN];
        self.flash.read_bytes(self.sectors[index], &mut raw)?;
        let magic = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if magic != STORE_MAGIC || !is_sealed(&raw) {
            return Ok(None);
        }
        Ok(Some(u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]])))
    }

    fn write_header(&mut self, index: usize, generation: u32) -> Result<(), NvsFlashError> {
        let mut raw = [0xFFu8; RECORD_LEN];
        raw[0..4].copy_from_slice(&STORE_MAGIC.to_le_bytes());
        raw[4..8].copy_from_slice(&generation.to_le_bytes());
        seal(&mut raw);
        self.flash.write_words(self.sectors[index], &raw)
    }

    /// Rewrites the live keys into the other sector and switches to it.
    fn compact(&mut self) -> Result<(), NvsFlashError> {
        if self.cache.len() as u32 > RECORD_SLOTS {
            return Err(NvsFlashError::StoreFull);
        }
        let target = 1 - self.active;
        let sector = self.sectors[target];
        let generation = self.generation.wrapping_add(1);
        self.flash.erase_sector(sector)?;

        let mut slot = 0u32;
        for (key, value) in &self.cache {
            let raw = encode_record(key, Some(*value))?;
            self.flash.write_words(record_addr(sector, slot), &raw)?;
            slot += 1;
        }
        self.write_header(target, generation)?;

        info!(
            "nvs: compacted generation={} keys={} sector={:#x}",
            generation, slot, sector
        );
        self.active = target;
        self.generation = generation;
        self.next_slot = slot;
        Ok(())
    }

    fn append(&mut self, key: &str, value: Option<u32>) -> Result<(), NvsFlashError> {
        let raw = encode_record(key, value)?;
        if self.next_slot >= RECORD_SLOTS {
            self.compact()?;
        }
        if self.next_slot >= RECORD_SLOTS {
            return Err(NvsFlashError::StoreFull);
        }
        let addr = record_addr(self.sectors[self.active], self.next_slot);
        self.flash.write_words(addr, &raw)?;
        self.next_slot += 1;
        debug!("nvs: appended key={} value={:?} slot={}", key, value, self.next_slot - 1);
        Ok(())
    }
}

impl NvStore for FlashNvStore {
    type Error = NvsFlashError;

    fn get(&mut self, key: &str) -> Result<Option<u32>, Self::Error> {
        Ok(self.cache.get(key).copied())
    }

    fn set(&mut self, key: &str, value: u32) -> Result<(), Self::Error> {
        if self.cache.get(key) == Some(&value) {
            return Ok(());
        }
        self.append(key, Some(value))?;
        self.cache.insert(String::from(key), value);
        Ok(())
    }

    fn erase(&mut self, key: &str) -> Result<(), Self::Error> {
        if !self.cache.contains_key(key) {
            return Ok(());
        }
        self.append(key, None)?;
        self.cache.remove(key);
        Ok(())
    }
}
