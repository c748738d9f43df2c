//! Analyze stage: profile a discovered asset, run its analyses inline and
//! fan its transforms out as jobs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::StageContext;
use crate::error::Result;
use crate::lock::{acquire_lock, finish_lock};
use crate::model::asset::file_ext_without_dot;
use crate::model::{JobStatus, LockState, Media, MediaProfile, ProfileJob, RecordMeta, SourceAsset};
use crate::naming;
use crate::profile::{exec_profile, ExecMode, ExecRequest, ResolvedProfile};
use crate::repo::upsert;
use crate::worker::{nap, PollWorker};

pub struct AnalyzeWorker {
    ctx: Arc<StageContext>,
}

impl AnalyzeWorker {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl PollWorker for AnalyzeWorker {
    fn name(&self) -> &str {
        "analyzer"
    }

    fn poll_interval(&self) -> Duration {
        self.ctx.config.analyzer_poll_interval()
    }

    async fn poll_once(&self, stop: &CancellationToken) -> Result<bool> {
        let ctx = self.ctx.as_ref();
        let pending = ctx
            .repos
            .assets
            .safe_find_first_by("status", &Value::from(JobStatus::Pending.as_str()), None)
            .await?;
        let Some(asset) = pending else {
            return Ok(false);
        };
        if stop.is_cancelled() {
            return Ok(false);
        }

        let Some(lock) = acquire_lock(
            ctx.owner(),
            ctx.clock.as_ref(),
            ctx.repos.assets.as_ref(),
            &asset.name,
            ctx.config.analyze_lock_timeout(),
        )
        .await?
        else {
            return Ok(false);
        };

        let span = info_span!("analyze", asset = %lock.name);
        let completed = analyze_source_asset(ctx, &lock, stop)
            .instrument(span)
            .await?;
        if completed {
            finish_lock(ctx.owner(), ctx.clock.as_ref(), ctx.repos.assets.as_ref(), lock).await?;
            info!(asset = %asset.name, "asset analyzed");
        }
        Ok(true)
    }
}

/// Profiles that apply to one asset, split by how they run.
#[derive(Debug, Default)]
pub struct AssetProfiles {
    /// Ordered by ascending priority.
    pub analysis: Vec<Arc<ResolvedProfile>>,
    pub transform: Vec<Arc<ResolvedProfile>>,
}

/// Runs the analyze stage for a claimed asset.
///
/// Once downloaded, every analysis runs and every transform job is created
/// regardless of `stop`. Returns `false` when the asset could not be
/// downloaded or `stop` fired while waiting on uploads or transform jobs; the
/// lock is then left to expire.
pub async fn analyze_source_asset(
    ctx: &StageContext,
    asset: &SourceAsset,
    stop: &CancellationToken,
) -> Result<bool> {
    let Some(downloaded) = ctx.download(&asset.name, stop).await? else {
        return Ok(false);
    };

    let ext = file_ext_without_dot(&asset.name).to_lowercase();
    let profiles = applicable_profiles(ctx, &ext).await?;
    debug!(
        asset = %asset.name,
        analysis = profiles.analysis.len(),
        transform = profiles.transform.len(),
        "resolved profiles"
    );

    let mut analyses: Vec<ProfileJob> = Vec::new();
    for profile in &profiles.analysis {
        let request = ExecRequest {
            profile,
            asset: &asset.name,
            downloaded: &downloaded.path,
            asset_dir: &ctx.config.asset_dir,
            source: Some(downloaded.source.clone()),
            analyses: &analyses,
        };
        match run_analysis(ctx, &request, stop).await? {
            Analysis::Finished(job) => analyses.push(job),
            Analysis::Failed => {}
            Analysis::Interrupted => return Ok(false),
        }
    }

    let mut waiting: BTreeMap<String, bool> = BTreeMap::new();
    for profile in &profiles.transform {
        let name = naming::profile_job_name(&asset.name, &profile.name);
        if ctx.repos.profile_jobs.safe_find_by_id(&name).await?.is_none() {
            let job = ProfileJob {
                name: name.clone(),
                profile: profile.name.clone(),
                operation: profile.operation.clone(),
                analysis: false,
                asset: asset.name.clone(),
                lock: LockState::pending(),
                result: None,
                meta: RecordMeta::default(),
            };
            match ctx.repos.profile_jobs.create(job).await {
                Ok(_) => info!(job = %name, profile = %profile.name, "created transform job"),
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e.into()),
            }
        }
        waiting.insert(name, false);
    }

    wait_for_transforms(ctx, &asset.name, &mut waiting, stop).await
}

/// Finds every enabled, runnable profile of every media covering `ext`,
/// including profiles inherited from a parent media.
pub async fn applicable_profiles(ctx: &StageContext, ext: &str) -> Result<AssetProfiles> {
    let media: Vec<Media> = ctx
        .repos
        .media
        .find_all()
        .await?
        .into_iter()
        .filter(|m| m.ext.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .collect();

    let mut media_chain = Vec::new();
    for m in &media {
        if let Some(parent) = &m.from {
            media_chain.push(parent.clone());
        }
        media_chain.push(m.name.clone());
    }

    let mut seen = BTreeSet::new();
    let mut found = AssetProfiles::default();
    for media_name in media_chain {
        let records = ctx
            .repos
            .profiles
            .find_by("media", &Value::from(media_name.as_str()), None)
            .await?;
        for record in records {
            if !seen.insert(record.name.clone()) || skipped(&record) {
                continue;
            }
            let resolved = match ctx.profiles.resolve(&record.name).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    error!(profile = %record.name, "cannot resolve profile: {}", e);
                    continue;
                }
            };
            if !resolved.enabled || resolved.noop {
                continue;
            }
            let Some(operation) = resolved.operation.as_deref() else {
                error!(profile = %resolved.name, "profile has no operation");
                continue;
            };
            match ctx.operations.get(operation) {
                Some(op) if op.analysis => found.analysis.push(resolved),
                Some(_) => found.transform.push(resolved),
                None => error!(profile = %resolved.name, operation, "unknown operation"),
            }
        }
    }

    found.analysis.sort_by_key(|p| p.priority);
    Ok(found)
}

fn skipped(record: &MediaProfile) -> bool {
    record.noop == Some(true) || record.enabled == Some(false)
}

enum Analysis {
    Finished(ProfileJob),
    /// Logged; the job stays `started`.
    Failed,
    /// `stop` fired before the outputs were delivered; the job stays `started`.
    Interrupted,
}

/// Runs one analysis profile and records it as an analysis job. Outputs of
/// an upload-worthy analysis are delivered before the job is finished.
async fn run_analysis(
    ctx: &StageContext,
    request: &ExecRequest<'_>,
    stop: &CancellationToken,
) -> Result<Analysis> {
    let profile = request.profile;
    let name = naming::profile_job_name(request.asset, &profile.name);
    let mut job = ProfileJob {
        name: name.clone(),
        profile: profile.name.clone(),
        operation: profile.operation.clone(),
        analysis: true,
        asset: request.asset.to_string(),
        lock: LockState::started_by(ctx.owner(), ctx.clock.now()),
        result: None,
        meta: RecordMeta::default(),
    };

    let outcome = match exec_profile(&ctx.operations, ctx.runner.as_ref(), request, ExecMode::Analyze).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(profile = %profile.name, asset = %request.asset, "analysis failed: {}", e);
            upsert(ctx.repos.profile_jobs.as_ref(), job).await?;
            return Ok(Analysis::Failed);
        }
    };

    if outcome.upload {
        let delivered = ctx
            .deliver_to_asset_destinations(request.asset, profile, &outcome.out_dir, stop)
            .await?;
        if !delivered {
            warn!(job = %name, "stopped before analysis outputs were delivered");
            upsert(ctx.repos.profile_jobs.as_ref(), job).await?;
            return Ok(Analysis::Interrupted);
        }
    }

    job.lock.finish(ctx.owner(), ctx.clock.now());
    job.result = Some(outcome.payload);
    let stored = upsert(ctx.repos.profile_jobs.as_ref(), job).await?;
    info!(job = %name, "recorded analysis job");
    Ok(Analysis::Finished(stored))
}

async fn wait_for_transforms(
    ctx: &StageContext,
    asset: &str,
    waiting: &mut BTreeMap<String, bool>,
    stop: &CancellationToken,
) -> Result<bool> {
    loop {
        let jobs = ctx
            .repos
            .profile_jobs
            .find_by("asset", &Value::from(asset), None)
            .await?;
        for job in jobs.iter().filter(|j| j.lock.is_finished()) {
            if let Some(done) = waiting.get_mut(&job.name) {
                *done = true;
            }
        }
        let remaining = waiting.values().filter(|done| !**done).count();
        if remaining == 0 {
            return Ok(true);
        }
        debug!(asset, remaining, "waiting for transform jobs");
        if !nap(ctx.config.analyzer_poll_interval(), stop).await {
            warn!(asset, remaining, "stopped while waiting for transform jobs");
            return Ok(false);
        }
    }
}
