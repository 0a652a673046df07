//! Everything one episode works with, built once after reset.

use alloc::string::String;

use chrono::NaiveDateTime;
use log::info;

use crate::{
    board::Board,
    config::{DeviceConfig, FileLayout, UnitId},
    error_log::{self, Severity},
    rtc::plausible_now,
    schedule::ScheduleTable,
    task::Task,
};

/// Hardware collaborators handed over by the board crate.
pub struct DeviceParts<B: Board> {
    pub nvs: B::Nvs,
    pub fs: B::Fs,
    pub internal_clock: B::InternalClock,
    pub external_clock: B::ExternalClock,
    pub modem: B::Modem,
    pub http: B::Http,
    pub ntp: B::Ntp,
    pub sensors: B::Sensors,
    pub updater: B::Updater,
    pub platform: B::Platform,
    pub rng: B::Rng,
}

pub struct DeviceContext<B: Board> {
    pub nvs: B::Nvs,
    pub fs: B::Fs,
    pub internal_clock: B::InternalClock,
    pub external_clock: B::ExternalClock,
    pub modem: B::Modem,
    pub http: B::Http,
    pub ntp: B::Ntp,
    pub sensors: B::Sensors,
    pub updater: B::Updater,
    pub platform: B::Platform,
    pub rng: B::Rng,
    pub layout: FileLayout,
    pub config: DeviceConfig,
    pub unit: UnitId,
    pub schedule: ScheduleTable,
    hw_id: String,
    reboot_into: Option<Task>,
}

impl<B: Board> DeviceContext<B> {
    /// Starts with built-in defaults; call [`Self::load_config`] once the
    /// card is up.
    pub fn new(parts: DeviceParts<B>, layout: FileLayout, hw_id: &str) -> Self {
        Self {
            nvs: parts.nvs,
            fs: parts.fs,
            internal_clock: parts.internal_clock,
            external_clock: parts.external_clock,
            modem: parts.modem,
            http: parts.http,
            ntp: parts.ntp,
            sensors: parts.sensors,
            updater: parts.updater,
            platform: parts.platform,
            rng: parts.rng,
            layout,
            config: DeviceConfig::default(),
            unit: UnitId {
                hw_id: String::from(hw_id),
                location_code: None,
            },
            schedule: ScheduleTable::default_table(),
            hw_id: String::from(hw_id),
            reboot_into: None,
        }
    }

    /// Reads device config, unit id and schedule from the card. Missing or
    /// broken files leave the defaults in place.
    pub fn load_config(&mut self) {
        self.config = DeviceConfig::load(&mut self.fs, &self.layout);
        self.unit = UnitId::load(&mut self.fs, &self.layout, &self.hw_id);
        self.schedule = ScheduleTable::from_config_or_default(&self.config.schedule);
        info!(
            "config: unit={} destinations={} schedule_entries={}",
            self.unit.hw_id,
            self.config.destinations.len(),
            self.schedule.entries().len()
        );
    }

    /// Internal clock reading, if it is plausible.
    pub fn now(&mut self) -> Option<NaiveDateTime> {
        plausible_now(&mut self.internal_clock)
    }

    /// Writes an entry to the error log on the card.
    pub fn report(&mut self, severity: Severity, message: &str) {
        let now = self.now();
        error_log::record(&mut self.fs, &self.layout, now, severity, message);
    }

    pub fn request_reboot(&mut self, next: Task) {
        self.reboot_into = Some(next);
    }

    pub fn reboot_requested(&self) -> Option<Task> {
        self.reboot_into
    }
}
