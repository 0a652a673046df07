//! Scripted collaborators shared by the unit tests.

use alloc::{boxed::Box, string::String, vec::Vec};
use core::cell::Cell;

use chrono::NaiveDateTime;
use rand::{SeedableRng, rngs::SmallRng};

use crate::{
    board::{Board, Clock, NetworkTime, Platform, Reading, Sensors},
    config::FileLayout,
    context::{DeviceContext, DeviceParts},
    fs::MemoryFs,
    http::{HttpClient, HttpError, HttpResponse, Method},
    modem::Modem,
    nvs::MemoryNvStore,
    tasks::updates::FileCopyUpdater,
};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FakeError;

#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    pub time: Option<NaiveDateTime>,
    pub writes: u32,
    pub fail_writes: bool,
}

impl FakeClock {
    pub fn at(time: NaiveDateTime) -> Self {
        Self {
            time: Some(time),
            ..Self::default()
        }
    }

    /// Every read fails.
    pub fn broken() -> Self {
        Self::default()
    }
}

impl Clock for FakeClock {
    type Error = FakeError;

    fn now(&mut self) -> Result<NaiveDateTime, Self::Error> {
        self.time.ok_or(FakeError)
    }

    fn set(&mut self, time: NaiveDateTime) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(FakeError);
        }
        self.time = Some(time);
        self.writes += 1;
        Ok(())
    }
}

/// Time only moves when the code under test waits, plus an optional
/// fixed step per uptime read.
#[derive(Debug, Default)]
pub struct FakePlatform {
    now_ms: Cell<u64>,
    pub tick_per_read_ms: u64,
    pub watchdog_feeds: u32,
    pub cancel: bool,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Platform for FakePlatform {
    fn uptime_ms(&self) -> u64 {
        let now = self.now_ms.get();
        self.now_ms.set(now + self.tick_per_read_ms);
        now
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.now_ms.set(self.now_ms.get() + u64::from(ms));
    }

    fn feed_watchdog(&mut self) {
        self.watchdog_feeds += 1;
    }

    fn cancel_requested(&self) -> bool {
        self.cancel
    }
}

#[derive(Debug, Default)]
pub struct FakeModem {
    pub attach_fails: bool,
    polls_to_attach: Option<u32>,
    polls_to_connect: Option<u32>,
    attach_requested: bool,
    connect_requested: bool,
    polls: u32,
    pub attached: bool,
    pub connected: bool,
    pub deinitialised: bool,
    pub sessions: u32,
}

impl FakeModem {
    /// Attach and connect each complete after `polls` status polls.
    pub fn working(polls: u32) -> Self {
        Self {
            polls_to_attach: Some(polls),
            polls_to_connect: Some(polls),
            ..Self::default()
        }
    }

    pub fn never_attaches() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            attach_fails: true,
            ..Self::default()
        }
    }
}

impl Modem for FakeModem {
    type Error = FakeError;

    async fn attach(&mut self) -> Result<(), Self::Error> {
        self.deinitialised = false;
        if self.attach_fails {
            return Err(FakeError);
        }
        self.attach_requested = true;
        self.polls = 0;
        Ok(())
    }

    fn is_attached(&mut self) -> bool {
        if self.attach_requested && !self.attached {
            self.polls += 1;
            if self.polls_to_attach.is_some_and(|n| self.polls >= n) {
                self.attached = true;
            }
        }
        self.attached
    }

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.connect_requested = true;
        self.polls = 0;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        if self.connect_requested && !self.connected {
            self.polls += 1;
            if self.polls_to_connect.is_some_and(|n| self.polls >= n) {
                self.connected = true;
                self.sessions += 1;
            }
        }
        self.connected
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.connect_requested = false;
        self.connected = false;
        Ok(())
    }

    async fn detach(&mut self) -> Result<(), Self::Error> {
        self.attach_requested = false;
        self.attached = false;
        Ok(())
    }

    async fn deinit(&mut self) -> Result<(), Self::Error> {
        self.deinitialised = true;
        Ok(())
    }
}

type Handler = Box<dyn FnMut(Method, &str, &[u8]) -> Result<HttpResponse, HttpError>>;

/// HTTP client answering from a closure and recording every request.
pub struct ScriptedHttp {
    handler: Handler,
    pub requests: Vec<(Method, String, Vec<u8>)>,
}

impl ScriptedHttp {
    pub fn new(handler: impl FnMut(Method, &str, &[u8]) -> Result<HttpResponse, HttpError> + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Vec::new(),
        }
    }

    pub fn always(status: u16) -> Self {
        Self::new(move |_, _, _| Ok(HttpResponse::new(status, b"")))
    }

    pub fn urls(&self) -> Vec<&str> {
        self.requests.iter().map(|(_, url, _)| url.as_str()).collect()
    }
}

impl HttpClient for ScriptedHttp {
    async fn request(&mut self, method: Method, url: &str, body: &[u8]) -> Result<HttpResponse, HttpError> {
        self.requests.push((method, String::from(url), body.to_vec()));
        (self.handler)(method, url, body)
    }
}

#[derive(Debug, Default)]
pub struct FakeNtp {
    pub time: Option<NaiveDateTime>,
}

impl NetworkTime for FakeNtp {
    type Error = FakeError;

    async fn fetch(&mut self) -> Result<NaiveDateTime, Self::Error> {
        self.time.ok_or(FakeError)
    }
}

#[derive(Debug, Default)]
pub struct FakeSensors {
    pub reading: Option<Reading>,
}

impl Sensors for FakeSensors {
    type Error = FakeError;

    fn probe(&mut self) -> Result<(), Self::Error> {
        self.reading.as_ref().map(|_| ()).ok_or(FakeError)
    }

    fn read(&mut self) -> Result<Reading, Self::Error> {
        self.reading.clone().ok_or(FakeError)
    }
}

pub struct TestBoard;

impl Board for TestBoard {
    type Nvs = MemoryNvStore;
    type Fs = MemoryFs;
    type InternalClock = FakeClock;
    type ExternalClock = FakeClock;
    type Modem = FakeModem;
    type Http = ScriptedHttp;
    type Ntp = FakeNtp;
    type Sensors = FakeSensors;
    type Updater = FileCopyUpdater;
    type Platform = FakePlatform;
    type Rng = SmallRng;
}

/// Context with a working modem, both clocks at `now` and an OK-everything server.
pub fn test_context(now: NaiveDateTime) -> DeviceContext<TestBoard> {
    DeviceContext::new(
        DeviceParts {
            nvs: MemoryNvStore::new(),
            fs: MemoryFs::new(),
            internal_clock: FakeClock::at(now),
            external_clock: FakeClock::at(now),
            modem: FakeModem::working(2),
            http: ScriptedHttp::always(200),
            ntp: FakeNtp::default(),
            sensors: FakeSensors {
                reading: Some(Reading {
                    co2_ppm: alloc::vec![412, 415],
                    temperature_c: Some(21.5),
                }),
            },
            updater: FileCopyUpdater,
            platform: FakePlatform::new(),
            rng: SmallRng::seed_from_u64(11),
        },
        FileLayout::standard(),
        "co2unit-test",
    )
}
