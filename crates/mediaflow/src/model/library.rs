use serde::{Deserialize, Serialize};

use super::{impl_record, LockState, Lockable, RecordMeta};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscanSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
}

/// A named collection of sources sharing one media type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub media: String,
    #[serde(default)]
    pub autoscan_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscan: Option<AutoscanSettings>,
    #[serde(default, rename = "_meta")]
    pub meta: RecordMeta,
}

impl_record!(Library, "library", name);

impl Library {
    pub fn new(name: &str, media: &str, sources: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            media: media.to_string(),
            autoscan_enabled: false,
            autoscan: None,
            meta: RecordMeta::default(),
        }
    }

    pub fn autoscan_interval_ms(&self) -> Option<u64> {
        self.autoscan.as_ref().and_then(|a| a.interval_ms)
    }

    pub fn autoscan_initial_delay_ms(&self) -> Option<u64> {
        self.autoscan.as_ref().and_then(|a| a.initial_delay_ms)
    }
}

/// One scheduled scan of a library. The record is its own lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryScan {
    pub scan_id: String,
    pub library: String,
    #[serde(flatten)]
    pub lock: LockState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<i64>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default, rename = "_meta")]
    pub meta: RecordMeta,
}

impl_record!(LibraryScan, "library_scan", scan_id);

impl LibraryScan {
    pub fn scheduled(scan_id: String, library: &str, scheduled: i64) -> Self {
        Self {
            scan_id,
            library: library.to_string(),
            lock: LockState::pending(),
            scheduled: Some(scheduled),
            error_count: 0,
            meta: RecordMeta::default(),
        }
    }
}

impl Lockable for LibraryScan {
    fn lock(&self) -> &LockState {
        &self.lock
    }

    fn lock_mut(&mut self) -> &mut LockState {
        &mut self.lock
    }

    fn lock_record(id: &str) -> Self {
        // Scan ids are `<timestamp>-<library>`; the timestamp has no dashes.
        let library = id.split_once('-').map(|(_, lib)| lib).unwrap_or(id);
        Self {
            scan_id: id.to_string(),
            library: library.to_string(),
            lock: LockState::default(),
            scheduled: None,
            error_count: 0,
            meta: RecordMeta::default(),
        }
    }
}

/// Node-local settings, stored as a single record with id [`LocalConfig::ID`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_id")]
    pub id: String,
    #[serde(default)]
    pub autoscan_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscan: Option<AutoscanSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_poll_interval_ms: Option<u64>,
    #[serde(default, rename = "_meta")]
    pub meta: RecordMeta,
}

impl_record!(LocalConfig, "local_config", id);

fn default_local_id() -> String {
    LocalConfig::ID.to_string()
}

impl LocalConfig {
    pub const ID: &'static str = "local";
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            id: default_local_id(),
            autoscan_enabled: false,
            autoscan: None,
            scan_poll_interval_ms: None,
            meta: RecordMeta::default(),
        }
    }
}
