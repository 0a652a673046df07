//! Collaborator traits the board support crate implements.

use alloc::vec::Vec;

use chrono::NaiveDateTime;
use rand::RngCore;

use crate::{fs::FileSystem, http::HttpClient, modem::Modem, nvs::NvStore};

/// Runtime services: uptime, cooperative delays, the liveness watchdog and
/// the operator interrupt.
#[allow(async_fn_in_trait)]
pub trait Platform {
    /// Milliseconds since this episode started.
    fn uptime_ms(&self) -> u64;
    async fn delay_ms(&mut self, ms: u32);
    fn feed_watchdog(&mut self);
    fn cancel_requested(&self) -> bool;
}

/// Wall clock in UTC. Used for both the volatile and the battery-backed clock.
pub trait Clock {
    type Error: core::fmt::Debug;

    fn now(&mut self) -> Result<NaiveDateTime, Self::Error>;
    fn set(&mut self, time: NaiveDateTime) -> Result<(), Self::Error>;
}

#[allow(async_fn_in_trait)]
pub trait NetworkTime {
    type Error: core::fmt::Debug;

    async fn fetch(&mut self) -> Result<NaiveDateTime, Self::Error>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reading {
    pub co2_ppm: Vec<u32>,
    pub temperature_c: Option<f32>,
}

pub trait Sensors {
    type Error: core::fmt::Debug;

    /// Quick presence check used by the self test.
    fn probe(&mut self) -> Result<(), Self::Error>;
    fn read(&mut self) -> Result<Reading, Self::Error>;
}

/// Applies a fully downloaded update directory.
pub trait Updater {
    type Error: core::fmt::Debug;

    fn install<F: FileSystem + ?Sized>(&mut self, fs: &mut F, update_dir: &str) -> Result<(), Self::Error>;
}

/// Bundles the concrete collaborator types of one board.
pub trait Board {
    type Nvs: NvStore;
    type Fs: FileSystem;
    type InternalClock: Clock;
    type ExternalClock: Clock;
    type Modem: Modem;
    type Http: HttpClient;
    type Ntp: NetworkTime;
    type Sensors: Sensors;
    type Updater: Updater;
    type Platform: Platform;
    type Rng: RngCore;
}
