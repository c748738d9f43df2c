use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::StageContext;
use crate::error::Result;
use crate::lock::{acquire_lock, finish_lock};
use crate::model::{JobStatus, UploadJob};
use crate::transfer::{transfer_timeout, upload_asset, UploadOutcome};
use crate::worker::PollWorker;

/// Delivers pending upload jobs, one per iteration.
pub struct UploadWorker {
    ctx: Arc<StageContext>,
}

impl UploadWorker {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }

    async fn upload(&self, job: UploadJob) -> Result<bool> {
        let ctx = self.ctx.as_ref();
        let Some(lock) = acquire_lock(
            ctx.owner(),
            ctx.clock.as_ref(),
            ctx.repos.upload_jobs.as_ref(),
            &job.name,
            transfer_timeout(job.size),
        )
        .await?
        else {
            return Ok(false);
        };

        let outcome = upload_asset(&lock, ctx.repos.destinations.as_ref(), ctx.connector.as_ref()).await?;
        if outcome == UploadOutcome::Skipped {
            info!(job = %lock.name, "destination already current");
        }
        let finished = finish_lock(ctx.owner(), ctx.clock.as_ref(), ctx.repos.upload_jobs.as_ref(), lock).await?;

        if ctx.config.remove_local_files {
            self.remove_local_file(&finished).await?;
        }
        Ok(true)
    }

    /// Deletes the local file once no other destination still needs it.
    async fn remove_local_file(&self, job: &UploadJob) -> Result<()> {
        let others_pending = |j: &UploadJob| j.name != job.name && !j.lock.is_finished();
        let remaining = self
            .ctx
            .repos
            .upload_jobs
            .find_by("local_path", &Value::from(job.local_path.as_str()), Some(&others_pending))
            .await?;
        if !remaining.is_empty() {
            debug!(path = %job.local_path, remaining = remaining.len(), "keeping local file for other uploads");
            return Ok(());
        }
        if let Err(e) = tokio::fs::remove_file(&job.local_path).await {
            warn!(path = %job.local_path, "failed to remove local file: {}", e);
        }
        Ok(())
    }
}

#[async_trait]
impl PollWorker for UploadWorker {
    fn name(&self) -> &str {
        "uploader"
    }

    fn poll_interval(&self) -> Duration {
        self.ctx.config.uploader_poll_interval()
    }

    async fn poll_once(&self, stop: &CancellationToken) -> Result<bool> {
        let pending = self
            .ctx
            .repos
            .upload_jobs
            .safe_find_first_by("status", &Value::from(JobStatus::Pending.as_str()), None)
            .await?;
        let Some(job) = pending else {
            return Ok(false);
        };
        if stop.is_cancelled() {
            return Ok(false);
        }

        let span = info_span!("upload", job = %job.name, destination = %job.destination);
        self.upload(job).instrument(span).await
    }
}
