#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use co2unit_core::{
    config::FileLayout,
    context::{DeviceContext, DeviceParts},
    episode::{EpisodeEnd, LAST_RESORT_SLEEP_SECS, run_episode},
    rtc::plausible_now,
    sntp::DEFAULT_SERVER,
    tasks::updates::FileCopyUpdater,
};
use co2unit_hal_esp32s3::{
    clock::{ds3231::Ds3231, internal::RtcClock},
    network::{http::NetHttpClient, sntp::SntpClient, wifi_link::WifiLink},
    platform::{self, EspPlatform},
    sensor::explorir::ExplorIr,
    storage::sd_fs::{BootTimeSource, SdFileSystem},
};
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_time::Timer;
use esp_hal::{
    clock::CpuClock,
    delay::Delay,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    i2c::master::I2c,
    rng::Rng,
    rtc_cntl::{Rtc, wakeup_cause},
    spi::master::Spi,
    time::Rate,
    timer::timg::TimerGroup,
    uart::Uart,
};
use log::{LevelFilter, error, info, warn};
use rand::{SeedableRng, rngs::SmallRng};
use static_cell::StaticCell;

use board::{BoardNvs, EspBoard};

#[path = "main/board.rs"]
mod board;
#[path = "main/power.rs"]
mod power;

const SD_SPI_HZ: u32 = 1_000_000;
const I2C_HZ: u32 = 100_000;
const CO2_UART_BAUD: u32 = 9600;
/// Sensor replies are digit counts; ppm = reply * scale.
const CO2_SCALE: u32 = 10;
const OPERATOR_IDLE_LOG_SECS: u64 = 60;

const WIFI_SSID: &str = env!(
    "CO2UNIT_WIFI_SSID",
    "set CO2UNIT_WIFI_SSID to the access point name before building"
);
const WIFI_PASSWORD: &str = env!(
    "CO2UNIT_WIFI_PASSWORD",
    "set CO2UNIT_WIFI_PASSWORD to the access point password before building"
);
/// Reported to servers when the card carries no unit id.
const HW_ID: &str = match option_env!("CO2UNIT_HW_ID") {
    Some(id) => id,
    None => "co2unit",
};

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<embassy_net::StackResources<4>> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    esp_println::println!("panic: {}", info);
    power::enter_deep_sleep(LAST_RESORT_SLEEP_SECS)
}

esp_bootloader_esp_idf::esp_app_desc!();

/// Board bring-up failed badly enough that no episode can run. Try again
/// after the last-resort interval.
fn abort_boot(what: &str) -> ! {
    error!("boot: {} failed; sleeping {}s", what, LAST_RESORT_SLEEP_SECS);
    power::enter_deep_sleep(LAST_RESORT_SLEEP_SECS)
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    let cause = platform::reset_cause();
    info!("boot: wakeup_cause={:?}", wakeup_cause());

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let operator_button = Input::new(
        peripherals.GPIO0,
        InputConfig::default().with_pull(Pull::Up),
    );
    let platform = EspPlatform::new(Rtc::new(peripherals.LPWR), operator_button);

    let rng = Rng::new(peripherals.RNG);
    let seed = ((rng.random() as u64) << 32) | rng.random() as u64;

    let mut internal_clock = RtcClock::new();
    let boot_time = plausible_now(&mut internal_clock);

    // SD SPI wiring: CS=GPIO8, SCK=GPIO4, MOSI=GPIO40, MISO=GPIO41
    let sd_cs = Output::new(peripherals.GPIO8, Level::High, OutputConfig::default());
    let sd_spi_config = esp_hal::spi::master::Config::default()
        .with_frequency(Rate::from_hz(SD_SPI_HZ))
        // SD cards in SPI mode use CPOL=0, CPHA=0.
        .with_mode(esp_hal::spi::Mode::_0);
    let Ok(sd_spi) = Spi::new(peripherals.SPI3, sd_spi_config) else {
        abort_boot("sd spi config");
    };
    let sd_spi = sd_spi
        .with_sck(peripherals.GPIO4)
        .with_mosi(peripherals.GPIO40)
        .with_miso(peripherals.GPIO41);
    let fs = SdFileSystem::new(sd_spi, sd_cs, Delay::new(), BootTimeSource::new(boot_time));

    // DS3231 wiring: SDA=GPIO1, SCL=GPIO2
    let i2c_config = esp_hal::i2c::master::Config::default().with_frequency(Rate::from_hz(I2C_HZ));
    let Ok(i2c) = I2c::new(peripherals.I2C0, i2c_config) else {
        abort_boot("i2c config");
    };
    let external_clock = Ds3231::new(i2c.with_sda(peripherals.GPIO1).with_scl(peripherals.GPIO2));

    // CO2 sensor wiring: TX=GPIO17, RX=GPIO18
    let uart_config = esp_hal::uart::Config::default().with_baudrate(CO2_UART_BAUD);
    let Ok(uart) = Uart::new(peripherals.UART1, uart_config) else {
        abort_boot("co2 uart config");
    };
    let sensors = ExplorIr::new(
        uart.with_tx(peripherals.GPIO17).with_rx(peripherals.GPIO18),
        Delay::new(),
        CO2_SCALE,
    );

    let radio = match esp_radio::init() {
        Ok(radio) => RADIO.init(radio),
        Err(err) => {
            info!("esp-radio init failed: {:?}", err);
            abort_boot("radio init");
        }
    };
    let (wifi_controller, interfaces) =
        match esp_radio::wifi::new(radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                info!("wifi peripheral init failed: {:?}", err);
                abort_boot("wifi init");
            }
        };

    let stack_config = embassy_net::Config::dhcpv4(Default::default());
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        stack_config,
        NET_RESOURCES.init(embassy_net::StackResources::<4>::new()),
        seed,
    );
    let modem = match WifiLink::new(wifi_controller, stack, WIFI_SSID, WIFI_PASSWORD) {
        Ok(link) => link,
        Err(err) => {
            info!("wifi mode config failed: {:?}", err);
            abort_boot("wifi config");
        }
    };

    let parts = DeviceParts::<EspBoard> {
        nvs: BoardNvs::open(),
        fs,
        internal_clock,
        external_clock,
        modem,
        http: NetHttpClient::new(stack),
        ntp: SntpClient::new(stack, DEFAULT_SERVER),
        sensors,
        updater: FileCopyUpdater,
        platform,
        rng: SmallRng::seed_from_u64(seed),
    };
    let mut ctx = DeviceContext::new(parts, FileLayout::short_names(), HW_ID);

    let end = match select(net_runner.run(), run_episode(&mut ctx, cause)).await {
        Either::First(never) => never,
        Either::Second(end) => end,
    };
    info!("boot: episode ended end={:?}", end);

    match end {
        EpisodeEnd::Sleep { seconds, .. } => power::enter_deep_sleep(seconds),
        EpisodeEnd::Reboot { .. } => power::reboot(),
        EpisodeEnd::Cancelled => {
            warn!("boot: operator interrupt; staying awake");
            ctx.platform.extend_watchdog_for_operator();
            loop {
                info!("boot: idle, waiting for operator");
                Timer::after_secs(OPERATOR_IDLE_LOG_SECS).await;
            }
        }
    }
}
