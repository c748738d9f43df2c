use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{Destination, Library, LocalConfig, Media, MediaProfile, Source};

/// Settings for one coordinator process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Owner identity written into every lock this process takes.
    #[serde(default = "default_system_name")]
    pub system_name: String,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_asset_dir")]
    pub asset_dir: PathBuf,
    /// SQLite file backing the repository. In-memory when unset.
    #[serde(default)]
    pub database: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub run_scanner: bool,
    #[serde(default = "default_true")]
    pub run_analyzer: bool,
    #[serde(default = "default_true")]
    pub run_transformer: bool,
    #[serde(default = "default_true")]
    pub run_uploader: bool,
    #[serde(default)]
    pub remove_local_files: bool,

    #[serde(default = "default_scan_poll_interval_ms")]
    pub scan_poll_interval_ms: u64,
    #[serde(default = "default_stage_poll_interval_ms")]
    pub analyzer_poll_interval_ms: u64,
    #[serde(default = "default_stage_poll_interval_ms")]
    pub transformer_poll_interval_ms: u64,
    #[serde(default = "default_stage_poll_interval_ms")]
    pub uploader_poll_interval_ms: u64,
    /// How often a stage re-checks the upload jobs it is waiting on.
    #[serde(default = "default_wait_interval_ms")]
    pub upload_wait_interval_ms: u64,
    /// How often a download re-checks a partial file another worker is writing.
    #[serde(default = "default_wait_interval_ms")]
    pub download_poll_interval_ms: u64,

    #[serde(default = "default_analyze_lock_timeout_ms")]
    pub analyze_lock_timeout_ms: u64,
    #[serde(default = "default_transform_lock_timeout_ms")]
    pub transform_lock_timeout_ms: u64,
    #[serde(default = "default_scan_lock_timeout_ms")]
    pub scan_lock_timeout_ms: u64,
    /// Finished scans older than this are purged; started ones are force-finished.
    #[serde(default = "default_scan_expiration_ms")]
    pub scan_expiration_ms: u64,

    /// Resolved profiles expire after this long. Cached until invalidated when unset.
    #[serde(default)]
    pub profile_cache_ttl_secs: Option<u64>,

    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub catalog: Option<Catalog>,
    /// External-command operations available to profiles.
    #[serde(default)]
    pub operations: Vec<CommandOperationConfig>,
}

fn default_true() -> bool {
    true
}

fn default_system_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("mediaflow-{}", &id[..8])
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".mediaflow")
}

fn default_download_dir() -> PathBuf {
    default_base_dir().join("downloads")
}

fn default_asset_dir() -> PathBuf {
    default_base_dir().join("assets")
}

fn default_scan_poll_interval_ms() -> u64 {
    30_000
}

fn default_stage_poll_interval_ms() -> u64 {
    5_000
}

fn default_wait_interval_ms() -> u64 {
    1_000
}

fn default_analyze_lock_timeout_ms() -> u64 {
    60 * 60 * 1000
}

fn default_transform_lock_timeout_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_scan_lock_timeout_ms() -> u64 {
    60 * 60 * 1000
}

fn default_scan_expiration_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            system_name: default_system_name(),
            download_dir: default_download_dir(),
            asset_dir: default_asset_dir(),
            database: None,
            run_scanner: true,
            run_analyzer: true,
            run_transformer: true,
            run_uploader: true,
            remove_local_files: false,
            scan_poll_interval_ms: default_scan_poll_interval_ms(),
            analyzer_poll_interval_ms: default_stage_poll_interval_ms(),
            transformer_poll_interval_ms: default_stage_poll_interval_ms(),
            uploader_poll_interval_ms: default_stage_poll_interval_ms(),
            upload_wait_interval_ms: default_wait_interval_ms(),
            download_poll_interval_ms: default_wait_interval_ms(),
            analyze_lock_timeout_ms: default_analyze_lock_timeout_ms(),
            transform_lock_timeout_ms: default_transform_lock_timeout_ms(),
            scan_lock_timeout_ms: default_scan_lock_timeout_ms(),
            scan_expiration_ms: default_scan_expiration_ms(),
            profile_cache_ttl_secs: None,
            logging: LoggingConfig::default(),
            catalog: None,
            operations: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    pub fn scan_poll_interval(&self) -> Duration {
        Duration::from_millis(self.scan_poll_interval_ms)
    }

    pub fn analyzer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.analyzer_poll_interval_ms)
    }

    pub fn transformer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.transformer_poll_interval_ms)
    }

    pub fn uploader_poll_interval(&self) -> Duration {
        Duration::from_millis(self.uploader_poll_interval_ms)
    }

    pub fn upload_wait_interval(&self) -> Duration {
        Duration::from_millis(self.upload_wait_interval_ms)
    }

    pub fn download_poll_interval(&self) -> Duration {
        Duration::from_millis(self.download_poll_interval_ms)
    }

    pub fn analyze_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.analyze_lock_timeout_ms)
    }

    pub fn transform_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.transform_lock_timeout_ms)
    }

    pub fn scan_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_lock_timeout_ms)
    }

    pub fn profile_cache_ttl(&self) -> Option<Duration> {
        self.profile_cache_ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Records written into the repository at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub media: Vec<Media>,
    #[serde(default)]
    pub profiles: Vec<MediaProfile>,
    #[serde(default)]
    pub libraries: Vec<Library>,
    #[serde(default)]
    pub local: Option<LocalConfig>,
}

/// An operation that runs `command` with `args` after `$variable` substitution.
///
/// Variables: `$input`, `$out_dir`, `$asset_path`, `$media`, `$profile`,
/// `$ext`, and every scalar profile parameter by its key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOperationConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub analysis: bool,
    /// Deliver the output directory like a transform (analysis operations only).
    #[serde(default)]
    pub upload: bool,
}
