use co2unit_core::{
    board::Board,
    nvs::{MemoryNvStore, NvStore},
    tasks::updates::FileCopyUpdater,
};
use co2unit_hal_esp32s3::{
    clock::{ds3231::Ds3231, internal::RtcClock},
    network::{http::NetHttpClient, sntp::SntpClient, wifi_link::WifiLink},
    platform::EspPlatform,
    sensor::explorir::ExplorIr,
    storage::{
        flash_nvs::{FlashNvStore, NvsFlashError},
        sd_fs::SdFileSystem,
    },
};
use esp_hal::{
    Blocking, delay::Delay, gpio::Output, i2c::master::I2c, spi::master::Spi, uart::Uart,
};
use log::warn;
use rand::rngs::SmallRng;

pub(super) struct EspBoard;

impl Board for EspBoard {
    type Nvs = BoardNvs;
    type Fs = SdFileSystem<Spi<'static, Blocking>, Output<'static>, Delay>;
    type InternalClock = RtcClock;
    type ExternalClock = Ds3231<I2c<'static, Blocking>>;
    type Modem = WifiLink<'static>;
    type Http = NetHttpClient<'static>;
    type Ntp = SntpClient<'static>;
    type Sensors = ExplorIr<Uart<'static, Blocking>, Delay>;
    type Updater = FileCopyUpdater;
    type Platform = EspPlatform<'static>;
    type Rng = SmallRng;
}

/// Flash store, or RAM when the partition cannot be used. In RAM the
/// breadcrumb and event log do not survive deep sleep.
pub(super) enum BoardNvs {
    Flash(FlashNvStore),
    Volatile(MemoryNvStore),
}

impl BoardNvs {
    pub(super) fn open() -> Self {
        match FlashNvStore::new() {
            Ok(store) => Self::Flash(store),
            Err(err) => {
                warn!("nvs: flash store unavailable err={:?}; state will be volatile", err);
                Self::Volatile(MemoryNvStore::new())
            }
        }
    }
}

impl NvStore for BoardNvs {
    type Error = NvsFlashError;

    fn get(&mut self, key: &str) -> Result<Option<u32>, Self::Error> {
        match self {
            Self::Flash(store) => store.get(key),
            Self::Volatile(store) => Ok(store.get(key).unwrap_or_default()),
        }
    }

    fn set(&mut self, key: &str, value: u32) -> Result<(), Self::Error> {
        match self {
            Self::Flash(store) => store.set(key, value),
            Self::Volatile(store) => {
                let _ = store.set(key, value);
                Ok(())
            }
        }
    }

    fn erase(&mut self, key: &str) -> Result<(), Self::Error> {
        match self {
            Self::Flash(store) => store.erase(key),
            Self::Volatile(store) => {
                let _ = store.erase(key);
                Ok(())
            }
        }
    }
}
