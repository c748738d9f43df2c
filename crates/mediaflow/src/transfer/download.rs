use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::transfer_timeout;
use crate::clock::{millis, Clock};
use crate::error::{MediaflowError, Result};
use crate::model::asset::{asset_path, asset_source};
use crate::model::Source;
use crate::naming;
use crate::repo::Repository;
use crate::storage::{Storage, VolumeConnector};
use crate::worker::nap;

/// A local copy of an asset plus the connection it came from.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub path: PathBuf,
    pub source: Arc<dyn Storage>,
}

pub struct DownloadRequest<'a> {
    pub download_dir: &'a Path,
    pub asset_name: &'a str,
    pub sources: &'a dyn Repository<Source>,
    pub connector: &'a dyn VolumeConnector,
    pub clock: &'a dyn Clock,
    /// How often a partial file left by another worker is re-checked.
    pub poll_interval: Duration,
}

async fn local_state(path: &Path) -> Option<(u64, i64)> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(millis)
        .unwrap_or(0);
    Some((meta.len(), mtime))
}

/// Downloads an asset to its deterministic local path.
///
/// A file already at that path with the source's size is reused. A file of a
/// different size is assumed to be another worker's download in progress and
/// is waited on until it completes or stops changing for the transfer timeout,
/// after which it is overwritten. Returns `None` if `stop` fires while waiting.
pub async fn download_source_asset(
    request: &DownloadRequest<'_>,
    stop: &CancellationToken,
) -> Result<Option<Downloaded>> {
    let source = request
        .sources
        .find_by_id(asset_source(request.asset_name))
        .await?;
    let conn = request.connector.connect_source(&source).await?;
    let src_path = asset_path(request.asset_name);
    let meta = conn.metadata(src_path).await?;

    tokio::fs::create_dir_all(request.download_dir)
        .await
        .map_err(|e| MediaflowError::io(request.download_dir, e))?;
    let outfile = naming::download_path(request.download_dir, request.asset_name);

    if let Some((mut size, mut mtime)) = local_state(&outfile).await {
        let timeout = millis(transfer_timeout(meta.size));
        while size != meta.size && request.clock.now() - mtime < timeout {
            debug!(
                asset = %request.asset_name,
                local = size,
                expected = meta.size,
                "waiting for in-progress download"
            );
            if !nap(request.poll_interval, stop).await {
                return Ok(None);
            }
            match local_state(&outfile).await {
                Some(state) => (size, mtime) = state,
                None => break,
            }
        }
        if local_state(&outfile).await.map(|(s, _)| s) == Some(meta.size) {
            debug!(asset = %request.asset_name, path = %outfile.display(), "reusing download");
            return Ok(Some(Downloaded {
                path: outfile,
                source: conn,
            }));
        }
        info!(asset = %request.asset_name, "overwriting stale download");
    }

    let mut file = tokio::fs::File::create(&outfile)
        .await
        .map_err(|e| MediaflowError::io(&outfile, e))?;
    let bytes = conn.read(src_path, &mut file).await?;
    info!(asset = %request.asset_name, bytes, path = %outfile.display(), "downloaded");

    Ok(Some(Downloaded {
        path: outfile,
        source: conn,
    }))
}
