//! The four pipeline stages and the collaborators they share.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::catalog::{seed_catalog, SeedSummary};
use crate::clock::SharedClock;
use crate::command::{CommandRunner, TokioCommandRunner};
use crate::config::{Catalog, CoordinatorConfig};
use crate::error::Result;
use crate::model::Destination;
use crate::profile::{OperationRegistry, ProfileResolver, ResolvedProfile};
use crate::repo::RepositorySet;
use crate::storage::{LocalConnector, StorageScanner, VolumeConnector, WalkingScanner};
use crate::transfer::{self, DownloadRequest, Downloaded};

pub mod analyze;
pub mod scan;
pub mod transform;
pub mod upload;

pub use analyze::{analyze_source_asset, AnalyzeWorker};
pub use scan::{scan_library, schedule_library_scan, ScanWorker};
pub use transform::{transform_asset, TransformWorker};
pub use upload::UploadWorker;

/// Everything a stage needs, shared by all loops of one process.
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<CoordinatorConfig>,
    pub repos: RepositorySet,
    pub clock: SharedClock,
    pub connector: Arc<dyn VolumeConnector>,
    pub scanner: Arc<dyn StorageScanner>,
    pub operations: Arc<OperationRegistry>,
    pub runner: Arc<dyn CommandRunner>,
    pub profiles: Arc<ProfileResolver>,
}

impl StageContext {
    /// Context with local volumes, the walking scanner and real process spawning.
    pub fn new(
        config: CoordinatorConfig,
        repos: RepositorySet,
        clock: SharedClock,
        operations: OperationRegistry,
    ) -> Self {
        let profiles = Arc::new(ProfileResolver::new(
            repos.profiles.clone(),
            config.profile_cache_ttl(),
        ));
        Self {
            config: Arc::new(config),
            repos,
            clock,
            connector: Arc::new(LocalConnector),
            scanner: Arc::new(WalkingScanner),
            operations: Arc::new(operations),
            runner: Arc::new(TokioCommandRunner),
            profiles,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn VolumeConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn StorageScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Seeds `catalog` and drops cached resolutions of every profile it
    /// touched, so running stages see the new definitions.
    pub async fn apply_catalog(&self, catalog: &Catalog) -> Result<SeedSummary> {
        let summary = seed_catalog(&self.repos, catalog).await?;
        for profile in &catalog.profiles {
            self.profiles.invalidate(&profile.name);
        }
        Ok(summary)
    }

    /// Lock owner identity of this process.
    pub fn owner(&self) -> &str {
        &self.config.system_name
    }

    pub(crate) async fn download(
        &self,
        asset_name: &str,
        stop: &CancellationToken,
    ) -> Result<Option<Downloaded>> {
        transfer::download_source_asset(
            &DownloadRequest {
                download_dir: &self.config.download_dir,
                asset_name,
                sources: self.repos.sources.as_ref(),
                connector: self.connector.as_ref(),
                clock: self.clock.as_ref(),
                poll_interval: self.config.download_poll_interval(),
            },
            stop,
        )
        .await
    }

    /// Destinations flagged to receive generated assets.
    pub(crate) async fn asset_destinations(&self) -> Result<Vec<Destination>> {
        Ok(self
            .repos
            .destinations
            .find_by("assets", &Value::Bool(true), None)
            .await?)
    }

    /// Queues every output in `out_dir` for every destination, then waits for
    /// the uploads to finish. Returns `false` if stopped while waiting.
    pub(crate) async fn deliver(
        &self,
        asset: &str,
        profile: &ResolvedProfile,
        out_dir: &Path,
        destinations: &[Destination],
        stop: &CancellationToken,
    ) -> Result<bool> {
        let files = transfer::collect_outputs(out_dir, profile).await?;
        let queued = transfer::queue_uploads(
            self.repos.upload_jobs.as_ref(),
            asset,
            profile,
            &files,
            destinations,
        )
        .await?;
        info!(asset, profile = %profile.name, uploads = queued.len(), "waiting for uploads");

        transfer::wait_for_uploads(
            self.repos.upload_jobs.as_ref(),
            asset,
            &profile.name,
            self.config.upload_wait_interval(),
            stop,
        )
        .await
    }

    /// Like [`deliver`](Self::deliver), but looks up the destinations itself
    /// and gives up with an error log when there are none.
    pub(crate) async fn deliver_to_asset_destinations(
        &self,
        asset: &str,
        profile: &ResolvedProfile,
        out_dir: &Path,
        stop: &CancellationToken,
    ) -> Result<bool> {
        let destinations = self.asset_destinations().await?;
        if destinations.is_empty() {
            error!(asset, profile = %profile.name, "no asset destinations, outputs not delivered");
            return Ok(true);
        }
        self.deliver(asset, profile, out_dir, &destinations, stop).await
    }
}
