//! Deterministic names for records and local files.
//!
//! Every worker derives the same name from the same inputs, which is what
//! makes job creation and downloads idempotent across a fleet.

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::model::asset::{asset_path, asset_source, basename, file_ext_with_dot};

/// Hex SHA-256 of `input`.
pub fn sha(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub fn profile_job_name(asset_name: &str, profile: &str) -> String {
    [
        profile,
        asset_source(asset_name),
        basename(asset_path(asset_name)),
        &sha(asset_name),
    ]
    .join("~")
}

pub fn upload_job_name(destination: &str, profile: &str, local_path: &str) -> String {
    [destination, profile, basename(local_path), &sha(local_path)].join("~")
}

/// `YYYYMMDDHHmmss-<library>` for a scan scheduled at `scheduled` (epoch millis).
pub fn scan_id(library: &str, scheduled: i64) -> String {
    let stamp = Utc
        .timestamp_millis_opt(scheduled)
        .single()
        .map(|t| t.format("%Y%m%d%H%M%S").to_string())
        .unwrap_or_else(|| scheduled.to_string());
    format!("{}-{}", stamp, library)
}

/// Where an asset is downloaded to: `downloaded_<sha(name)><.ext>`.
pub fn download_path(download_dir: &Path, asset_name: &str) -> PathBuf {
    download_dir.join(format!(
        "downloaded_{}{}",
        sha(asset_name),
        file_ext_with_dot(asset_name)
    ))
}

/// Working directory for one profile's outputs from one downloaded file.
pub fn output_dir(asset_dir: &Path, profile: &str, downloaded: &Path) -> PathBuf {
    asset_dir
        .join(profile)
        .join(sha(&downloaded.to_string_lossy()))
}
