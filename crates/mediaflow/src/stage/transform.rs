//! Transform stage: run one deferred profile job and deliver its outputs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::StageContext;
use crate::error::Result;
use crate::lock::{acquire_lock, finish_lock};
use crate::model::{Destination, JobStatus, ProfileJob};
use crate::profile::{exec_profile, ExecMode, ExecRequest};
use crate::worker::PollWorker;

pub struct TransformWorker {
    ctx: Arc<StageContext>,
}

impl TransformWorker {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl PollWorker for TransformWorker {
    fn name(&self) -> &str {
        "transformer"
    }

    fn poll_interval(&self) -> Duration {
        self.ctx.config.transformer_poll_interval()
    }

    async fn poll_once(&self, stop: &CancellationToken) -> Result<bool> {
        let ctx = self.ctx.as_ref();
        let destinations = ctx.asset_destinations().await?;
        if destinations.is_empty() {
            error!("no destinations accept assets, not transforming");
            return Ok(false);
        }

        let pending = ctx
            .repos
            .profile_jobs
            .safe_find_first_by("status", &Value::from(JobStatus::Pending.as_str()), None)
            .await?;
        let Some(job) = pending else {
            return Ok(false);
        };
        if stop.is_cancelled() {
            return Ok(false);
        }

        let span = info_span!("transform", job = %job.name, profile = %job.profile);
        transform_asset(ctx, &job, &destinations, stop)
            .instrument(span)
            .await
    }
}

/// Claims `job`, runs its profile and waits for the outputs to reach every
/// destination before finishing it.
///
/// Returns `false` when nothing was transformed: the job was held elsewhere,
/// its profile should not run, the operation failed, or `stop` fired.
pub async fn transform_asset(
    ctx: &StageContext,
    job: &ProfileJob,
    destinations: &[Destination],
    stop: &CancellationToken,
) -> Result<bool> {
    let Some(mut lock) = acquire_lock(
        ctx.owner(),
        ctx.clock.as_ref(),
        ctx.repos.profile_jobs.as_ref(),
        &job.name,
        ctx.config.transform_lock_timeout(),
    )
    .await?
    else {
        return Ok(false);
    };

    let Some(downloaded) = ctx.download(&lock.asset, stop).await? else {
        return Ok(false);
    };

    let profile = match ctx.profiles.resolve(&lock.profile).await {
        Ok(profile) => profile,
        Err(e) => {
            error!(profile = %lock.profile, "cannot resolve profile: {}", e);
            return Ok(false);
        }
    };
    // Any of these means the job should never have been created.
    if profile.media.is_none() {
        warn!(profile = %profile.name, "skipping profile without media");
        return Ok(false);
    }
    if !profile.enabled {
        warn!(profile = %profile.name, "skipping disabled profile");
        return Ok(false);
    }
    if profile.noop {
        warn!(profile = %profile.name, "skipping noop profile");
        return Ok(false);
    }

    let is_analysis = |j: &ProfileJob| j.analysis && j.lock.is_finished();
    let analyses = ctx
        .repos
        .profile_jobs
        .find_by("asset", &Value::from(lock.asset.as_str()), Some(&is_analysis))
        .await?;

    let request = ExecRequest {
        profile: &profile,
        asset: &lock.asset,
        downloaded: &downloaded.path,
        asset_dir: &ctx.config.asset_dir,
        source: Some(downloaded.source.clone()),
        analyses: &analyses,
    };
    let outcome = match exec_profile(&ctx.operations, ctx.runner.as_ref(), &request, ExecMode::Transform).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(profile = %profile.name, asset = %lock.asset, "transform failed: {}", e);
            return Ok(false);
        }
    };

    let delivered = ctx
        .deliver(&lock.asset, &profile, &outcome.out_dir, destinations, stop)
        .await?;
    if !delivered {
        warn!(job = %lock.name, "stopped before uploads finished");
        return Ok(false);
    }

    lock.result = Some(outcome.payload);
    let finished = finish_lock(ctx.owner(), ctx.clock.as_ref(), ctx.repos.profile_jobs.as_ref(), lock).await?;
    info!(job = %finished.name, asset = %finished.asset, "transform finished");

    if ctx.config.remove_local_files {
        if let Err(e) = tokio::fs::remove_dir_all(&outcome.out_dir).await {
            warn!(dir = %outcome.out_dir.display(), "failed to remove output directory: {}", e);
        }
    }
    Ok(true)
}
