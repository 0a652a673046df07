//! Small persistent key/value store that survives deep sleep.

use alloc::{collections::BTreeMap, string::String};

/// Keys written by the core.
pub mod keys {
    /// Boot-continuation breadcrumb: id of the task to run on the next wake.
    pub const NEXT_TASK: &str = "co2_next";
    pub const LOG_START: &str = "log_start";
    pub const LOG_LEN: &str = "log_len";
    pub const LOG_SLOTS: [&str; crate::event_log::EVENT_LOG_CAPACITY] = [
        "log_00", "log_01", "log_02", "log_03", "log_04", "log_05", "log_06", "log_07", "log_08",
        "log_09", "log_10", "log_11", "log_12", "log_13", "log_14", "log_15",
    ];
    pub const BACKOFF_TRIED: &str = "bo_tried";
    pub const BACKOFF_THRESHOLD: &str = "bo_thresh";
}

/// Word-sized persistent storage backend.
pub trait NvStore {
    type Error: core::fmt::Debug;

    fn get(&mut self, key: &str) -> Result<Option<u32>, Self::Error>;
    fn set(&mut self, key: &str, value: u32) -> Result<(), Self::Error>;
    /// Removes `key`. Erasing a missing key is not an error.
    fn erase(&mut self, key: &str) -> Result<(), Self::Error>;

    fn get_or(&mut self, key: &str, default: u32) -> Result<u32, Self::Error> {
        Ok(self.get(key)?.unwrap_or(default))
    }
}

/// RAM-only store used during bring-up and in tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryNvStore {
    entries: BTreeMap<String, u32>,
}

impl MemoryNvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NvStore for MemoryNvStore {
    type Error = core::convert::Infallible;

    fn get(&mut self, key: &str) -> Result<Option<u32>, Self::Error> {
        Ok(self.entries.get(key).copied())
    }

    fn set(&mut self, key: &str, value: u32) -> Result<(), Self::Error> {
        self.entries.insert(String::from(key), value);
        Ok(())
    }

    fn erase(&mut self, key: &str) -> Result<(), Self::Error> {
        self.entries.remove(key);
        Ok(())
    }
}
