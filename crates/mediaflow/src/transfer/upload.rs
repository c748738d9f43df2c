use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::destination_path;
use crate::error::{MediaflowError, Result};
use crate::model::{Destination, LockState, RecordMeta, UploadJob};
use crate::naming;
use crate::profile::ResolvedProfile;
use crate::repo::Repository;
use crate::storage::VolumeConnector;
use crate::worker::nap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Transferred(u64),
    /// The destination already had a file of the same size.
    Skipped,
}

/// Output files in `out_dir` the profile delivers, by file name.
pub async fn collect_outputs(out_dir: &Path, profile: &ResolvedProfile) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(out_dir)
        .await
        .map_err(|e| MediaflowError::io(out_dir, e))?;

    let mut names = BTreeSet::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MediaflowError::io(out_dir, e))?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if is_file {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }

    let outputs: Vec<PathBuf> = names
        .into_iter()
        .filter(|name| profile.is_output(name))
        .map(|name| out_dir.join(name))
        .collect();
    if outputs.is_empty() {
        warn!(
            profile = %profile.name,
            ext = profile.ext.as_deref().unwrap_or(""),
            dir = %out_dir.display(),
            "no output files matched"
        );
    }
    Ok(outputs)
}

/// Creates one pending upload job per (file, destination). Existing jobs are kept.
pub async fn queue_uploads(
    upload_jobs: &dyn Repository<UploadJob>,
    asset: &str,
    profile: &ResolvedProfile,
    files: &[PathBuf],
    destinations: &[Destination],
) -> Result<Vec<String>> {
    let media = profile.media.clone().unwrap_or_default();
    let mut names = Vec::with_capacity(files.len() * destinations.len());

    for file in files {
        let size = tokio::fs::metadata(file)
            .await
            .map_err(|e| MediaflowError::io(file, e))?
            .len();
        let local_path = file.to_string_lossy().into_owned();

        for dest in destinations {
            let name = naming::upload_job_name(&dest.name, &profile.name, &local_path);
            if upload_jobs.safe_find_by_id(&name).await?.is_none() {
                let job = UploadJob {
                    name: name.clone(),
                    local_path: local_path.clone(),
                    asset: asset.to_string(),
                    media: media.clone(),
                    profile: profile.name.clone(),
                    destination: dest.name.clone(),
                    size,
                    lock: LockState::pending(),
                    meta: RecordMeta::default(),
                };
                match upload_jobs.create(job).await {
                    Ok(_) => info!(job = %name, destination = %dest.name, size, "queued upload"),
                    Err(e) if e.is_conflict() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            names.push(name);
        }
    }
    Ok(names)
}

/// Polls until every upload job for `asset` and `profile` is finished.
///
/// Returns `false` if `stop` fires first.
pub async fn wait_for_uploads(
    upload_jobs: &dyn Repository<UploadJob>,
    asset: &str,
    profile: &str,
    poll_interval: Duration,
    stop: &CancellationToken,
) -> Result<bool> {
    let same_profile = |j: &UploadJob| j.profile == profile;
    loop {
        let jobs = upload_jobs
            .find_by("asset", &Value::from(asset), Some(&same_profile))
            .await?;
        let unfinished = jobs.iter().filter(|j| !j.lock.is_finished()).count();
        if unfinished == 0 {
            return Ok(true);
        }
        debug!(asset, profile, unfinished, "waiting for uploads");
        if !nap(poll_interval, stop).await {
            return Ok(false);
        }
    }
}

/// Writes one upload job's file to its destination, unless an equal-sized
/// file is already there.
pub async fn upload_asset(
    job: &UploadJob,
    destinations: &dyn Repository<Destination>,
    connector: &dyn VolumeConnector,
) -> Result<UploadOutcome> {
    let destination = destinations.find_by_id(&job.destination).await?;
    let conn = connector.connect_destination(&destination).await?;
    let dest_path = destination_path(&job.asset, &job.profile, &job.local_path);

    let local_size = tokio::fs::metadata(&job.local_path)
        .await
        .map_err(|e| MediaflowError::io(&job.local_path, e))?
        .len();
    if let Some(existing) = conn.safe_metadata(&dest_path).await? {
        if existing.size == local_size {
            debug!(job = %job.name, path = %dest_path, "destination already has file");
            return Ok(UploadOutcome::Skipped);
        }
    }

    let mut file = tokio::fs::File::open(&job.local_path)
        .await
        .map_err(|e| MediaflowError::io(&job.local_path, e))?;
    let written = conn.write(&dest_path, &mut file).await?;
    info!(job = %job.name, destination = %job.destination, path = %dest_path, bytes = written, "uploaded");
    Ok(UploadOutcome::Transferred(written))
}
