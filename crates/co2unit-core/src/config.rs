//! Runtime configuration read from the SD card.

use alloc::{string::String, vec, vec::Vec};

use serde::{Deserialize, Serialize};

use crate::{fs::FileSystem, seqfile::SeqPattern, state_file};

pub const DEFAULT_CHUNK_SIZE: u32 = 4096;
pub const DEFAULT_SYNC_BUDGET_SECS: u32 = 120;
pub const DEFAULT_BACKOFF_MAX: u32 = 6;
pub const DEFAULT_DRIFT_TOLERANCE_SECS: u32 = 4;
pub const READINGS_SIZE_LIMIT: u32 = 100_000;
pub const ERRORS_SIZE_LIMIT: u32 = 100 * 1024;

/// One sync server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Destination {
    pub name: String,
    /// Base URL without trailing slash, e.g. `http://example.org/co2`.
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub destinations: Vec<Destination>,
    pub chunk_size: u32,
    pub sync_budget_secs: u32,
    pub backoff_max: u32,
    pub drift_tolerance_secs: u32,
    /// Local directories pushed to every destination.
    pub push_dirs: Vec<String>,
    /// Remote directory the newest update is pulled from.
    pub remote_updates_dir: String,
    pub pull_updates: bool,
    /// `[task, kind, args...]` rows, see [`crate::schedule::ScheduleTable::from_config`].
    pub schedule: Vec<Vec<serde_json::Value>>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            destinations: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            sync_budget_secs: DEFAULT_SYNC_BUDGET_SECS,
            backoff_max: DEFAULT_BACKOFF_MAX,
            drift_tolerance_secs: DEFAULT_DRIFT_TOLERANCE_SECS,
            push_dirs: Vec::new(),
            remote_updates_dir: String::from("updates"),
            pull_updates: true,
            schedule: Vec::new(),
        }
    }
}

impl DeviceConfig {
    pub fn load<F: FileSystem + ?Sized>(fs: &mut F, layout: &FileLayout) -> Self {
        let mut config: Self = state_file::load_or_default(fs, layout.config_path);
        if config.push_dirs.is_empty() {
            config.push_dirs = vec![
                String::from(layout.readings_dir),
                String::from(layout.errors_dir),
            ];
        }
        config.chunk_size = config.chunk_size.max(1);
        config
    }
}

/// Identity reported to servers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitId {
    pub hw_id: String,
    pub location_code: Option<String>,
}

impl UnitId {
    pub fn load<F: FileSystem + ?Sized>(fs: &mut F, layout: &FileLayout, fallback_hw_id: &str) -> Self {
        let mut id: Self = state_file::load_or_default(fs, layout.unit_id_path);
        if id.hw_id.is_empty() {
            id.hw_id = String::from(fallback_hw_id);
        }
        id
    }
}

/// Where things live on the card.
///
/// Backends limited to 8.3 names use [`FileLayout::short_names`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileLayout {
    pub config_path: &'static str,
    pub unit_id_path: &'static str,
    pub readings_dir: &'static str,
    pub readings: SeqPattern,
    pub errors_dir: &'static str,
    pub errors: SeqPattern,
    pub sync_state_dir: &'static str,
    pub state_suffix: &'static str,
    pub updates_dir: &'static str,
    pub updates_state_path: &'static str,
    pub update_prefix: &'static str,
    pub tmp_prefix: &'static str,
    /// Whether the backend can rename directories, which pulling needs.
    pub supports_pull: bool,
}

impl FileLayout {
    pub const fn standard() -> Self {
        Self {
            config_path: "conf/device.json",
            unit_id_path: "conf/ou-id.json",
            readings_dir: "data/readings",
            readings: SeqPattern::new("readings-", ".tsv"),
            errors_dir: "errors",
            errors: SeqPattern::new("errors-", ".txt"),
            sync_state_dir: "var",
            state_suffix: ".json",
            updates_dir: "updates",
            updates_state_path: "var/updates-state.json",
            update_prefix: "update-",
            tmp_prefix: "tmp-",
            supports_pull: true,
        }
    }

    pub const fn short_names() -> Self {
        Self {
            config_path: "CONF/DEVICE.JSN",
            unit_id_path: "CONF/OUID.JSN",
            readings_dir: "DATA/READINGS",
            readings: SeqPattern::new("RD", ".TSV"),
            errors_dir: "ERRORS",
            errors: SeqPattern::new("ER", ".TXT"),
            sync_state_dir: "VAR",
            state_suffix: ".JSN",
            updates_dir: "UPDATES",
            updates_state_path: "VAR/UPDSTATE.JSN",
            update_prefix: "UPD",
            tmp_prefix: "T",
            supports_pull: false,
        }
    }
}

impl Default for FileLayout {
    fn default() -> Self {
        Self::standard()
    }
}
