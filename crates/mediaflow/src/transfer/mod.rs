//! Moving bytes between volumes and the local working directories.

use std::time::Duration;

use crate::model::asset::{asset_path, basename};

pub mod download;
pub mod upload;

pub use download::{download_source_asset, DownloadRequest, Downloaded};
pub use upload::{collect_outputs, queue_uploads, upload_asset, wait_for_uploads, UploadOutcome};

const MIN_TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TRANSFER_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);
/// Slowest link a transfer is expected to run over, in bytes per second.
const MIN_BANDWIDTH: u64 = 500_000;

/// How long a transfer of `size` bytes may go without progress before it is
/// considered abandoned.
pub fn transfer_timeout(size: u64) -> Duration {
    Duration::from_secs(size / MIN_BANDWIDTH).clamp(MIN_TRANSFER_TIMEOUT, MAX_TRANSFER_TIMEOUT)
}

/// Where an output file lands on a destination: `<asset path>/<profile>/<file>`.
pub fn destination_path(asset_name: &str, profile: &str, local_path: &str) -> String {
    format!(
        "{}/{}/{}",
        asset_path(asset_name).trim_matches('/'),
        profile,
        basename(local_path)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_timeout_clamps() {
        assert_eq!(transfer_timeout(0), Duration::from_secs(60));
        assert_eq!(transfer_timeout(59 * 500_000), Duration::from_secs(60));
        assert_eq!(transfer_timeout(600 * 500_000 + 1), Duration::from_secs(600));
        assert_eq!(transfer_timeout(u64::MAX), Duration::from_secs(4 * 60 * 60));
    }

    #[test]
    fn test_destination_path() {
        assert_eq!(
            destination_path("src>movies/a.mp4", "upper", "/tmp/out/a.txt"),
            "movies/a.mp4/upper/a.txt"
        );
    }
}
