//! Scheduling library scans and registering discovered files.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::StageContext;
use crate::error::{MediaflowError, Result, StorageError};
use crate::lock::{acquire_lock, finish_lock};
use crate::model::asset::asset_name;
use crate::model::{JobStatus, Library, LibraryScan, LocalConfig, SourceAsset};
use crate::naming;
use crate::repo::Repository;
use crate::storage::{FileMeta, ScanVisitor};
use crate::worker::PollWorker;

pub struct ScanWorker {
    ctx: Arc<StageContext>,
    interval_ms: AtomicU64,
    started_at: i64,
}

impl ScanWorker {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        let interval_ms = AtomicU64::new(ctx.config.scan_poll_interval_ms);
        let started_at = ctx.clock.now();
        Self {
            ctx,
            interval_ms,
            started_at,
        }
    }

    /// Purges expired scans and settles the ones a dead worker left `started`.
    pub async fn sweep(&self) -> Result<()> {
        let scans = self.ctx.repos.scans.as_ref();
        let now = self.ctx.clock.now();
        let expiration = now - self.ctx.config.scan_expiration_ms as i64;
        let stale = now - self.ctx.config.scan_lock_timeout_ms as i64;

        for scan in scans
            .find_by("status", &Value::from(JobStatus::Finished.as_str()), None)
            .await?
        {
            if scan.lock.finished.map_or(true, |f| f < expiration) {
                debug!(scan = %scan.scan_id, "purging expired scan");
                scans.purge(&scan.scan_id).await?;
            }
        }

        for mut scan in scans
            .find_by("status", &Value::from(JobStatus::Started.as_str()), None)
            .await?
        {
            match scan.lock.started {
                Some(started) if started >= expiration => {
                    if started >= stale {
                        continue;
                    }
                    warn!(scan = %scan.scan_id, owner = ?scan.lock.owner, "force-finishing abandoned scan");
                    scan.lock.status = Some(JobStatus::Finished);
                    scan.lock.finished = Some(now);
                    scan.error_count += 1;
                    match scans.update(scan).await {
                        Ok(_) => {}
                        Err(e) if e.is_conflict() => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                _ => {
                    debug!(scan = %scan.scan_id, "purging expired started scan");
                    scans.purge(&scan.scan_id).await?;
                }
            }
        }
        Ok(())
    }

    async fn run_due_scans(&self, stop: &CancellationToken) -> Result<()> {
        let now = self.ctx.clock.now();
        let due = |s: &LibraryScan| s.scheduled.is_some_and(|t| t <= now);
        let mut pending = self
            .ctx
            .repos
            .scans
            .find_by("status", &Value::from(JobStatus::Pending.as_str()), Some(&due))
            .await?;
        pending.sort_by_key(|s| s.scheduled);

        for scan in pending {
            if stop.is_cancelled() {
                break;
            }
            info!(scan = %scan.scan_id, library = %scan.library, "running scan");
            if let Err(e) = scan_library(&self.ctx, &scan).await {
                error!(scan = %scan.scan_id, library = %scan.library, "scan failed: {}", e);
            }
        }
        Ok(())
    }

    async fn schedule_autoscans(&self, local: &LocalConfig, stop: &CancellationToken) -> Result<()> {
        let now = self.ctx.clock.now();
        let local_interval = local.autoscan.as_ref().and_then(|a| a.interval_ms);
        let libraries = self
            .ctx
            .repos
            .libraries
            .find_by("autoscan_enabled", &Value::Bool(true), None)
            .await?;

        for library in libraries {
            if stop.is_cancelled() {
                break;
            }
            let Some(interval) = library.autoscan_interval_ms().or(local_interval) else {
                error!(library = %library.name, "autoscan enabled without an interval");
                continue;
            };
            if let Some(delay) = library.autoscan_initial_delay_ms() {
                if now - self.started_at < delay as i64 {
                    continue;
                }
            }

            let future_pending = |s: &LibraryScan| {
                s.lock.status == Some(JobStatus::Pending) && s.scheduled.is_some_and(|t| t > now)
            };
            let scheduled = self
                .ctx
                .repos
                .scans
                .find_by("library", &Value::from(library.name.as_str()), Some(&future_pending))
                .await?;
            if scheduled.is_empty() {
                schedule_library_scan(&self.ctx, &library.name, now + interval as i64).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PollWorker for ScanWorker {
    fn name(&self) -> &str {
        "scanner"
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    async fn init(&self) -> Result<()> {
        self.sweep().await
    }

    async fn poll_once(&self, stop: &CancellationToken) -> Result<bool> {
        self.run_due_scans(stop).await?;

        // Re-read every pass so operators can retune a running node.
        let Some(local) = self
            .ctx
            .repos
            .local_config
            .safe_find_by_id(LocalConfig::ID)
            .await?
        else {
            return Ok(false);
        };
        if let Some(interval) = local.scan_poll_interval_ms.filter(|i| *i > 0) {
            self.interval_ms.store(interval, Ordering::Relaxed);
        }
        if !local.autoscan_enabled {
            return Ok(false);
        }
        if let Some(delay) = local.autoscan.as_ref().and_then(|a| a.initial_delay_ms) {
            if self.ctx.clock.now() - self.started_at < delay as i64 {
                return Ok(false);
            }
        }

        self.schedule_autoscans(&local, stop).await?;
        Ok(false)
    }
}

/// Creates a pending scan of `library` due at `at`. An existing scan with the
/// same id is returned unchanged.
pub async fn schedule_library_scan(
    ctx: &StageContext,
    library: &str,
    at: i64,
) -> Result<LibraryScan> {
    let scan = LibraryScan::scheduled(naming::scan_id(library, at), library, at);
    match ctx.repos.scans.create(scan.clone()).await {
        Ok(created) => {
            info!(scan = %created.scan_id, library, scheduled = at, "scheduled scan");
            Ok(created)
        }
        Err(e) if e.is_conflict() => Ok(ctx.repos.scans.find_by_id(&scan.scan_id).await?),
        Err(e) => Err(e.into()),
    }
}

/// Claims `scan` and walks every source of its library.
///
/// Source failures are counted into `error_count`; the scan is finished
/// either way. A scan of a library that no longer exists is finished with
/// one error.
pub async fn scan_library(ctx: &StageContext, scan: &LibraryScan) -> Result<()> {
    let Some(mut lock) = acquire_lock(
        ctx.owner(),
        ctx.clock.as_ref(),
        ctx.repos.scans.as_ref(),
        &scan.scan_id,
        ctx.config.scan_lock_timeout(),
    )
    .await?
    else {
        debug!(scan = %scan.scan_id, "scan held elsewhere");
        return Ok(());
    };
    let Some(library) = ctx.repos.libraries.safe_find_by_id(&scan.library).await? else {
        error!(scan = %scan.scan_id, library = %scan.library, "library not found");
        lock.error_count += 1;
        finish_lock(ctx.owner(), ctx.clock.as_ref(), ctx.repos.scans.as_ref(), lock).await?;
        return Ok(());
    };

    let span = info_span!("scan_library", scan = %scan.scan_id, library = %library.name);
    let library = &library;
    let failures = async {
        let results = join_all(library.sources.iter().map(|source| async move {
            let result = match scan_extensions(ctx, library, source).await {
                Ok(extensions) => scan_source(ctx, source, &extensions).await,
                Err(e) => Err(e),
            };
            match &result {
                Ok(()) => info!(source = %source, "source scan finished"),
                Err(e) => error!(source = %source, "source scan failed: {}", e),
            }
            result
        }))
        .await;
        results.iter().filter(|r| r.is_err()).count() as u32
    }
    .instrument(span)
    .await;

    lock.error_count += failures;
    let finished = finish_lock(ctx.owner(), ctx.clock.as_ref(), ctx.repos.scans.as_ref(), lock).await?;
    info!(scan = %finished.scan_id, errors = finished.error_count, "scan finished");
    Ok(())
}

/// Extensions worth scanning `source` for: those of every media used by any
/// library that includes it.
async fn scan_extensions(
    ctx: &StageContext,
    library: &Library,
    source: &str,
) -> Result<BTreeSet<String>> {
    let mut media_names = BTreeSet::from([library.media.clone()]);
    for other in ctx
        .repos
        .libraries
        .find_by("sources", &Value::from(source), None)
        .await?
    {
        media_names.insert(other.media);
    }

    let mut extensions = BTreeSet::new();
    for name in media_names {
        let media = ctx.repos.media.find_by_id(&name).await?;
        extensions.extend(media.ext.iter().map(|e| e.to_lowercase()));
    }
    Ok(extensions)
}

async fn scan_source(ctx: &StageContext, source_name: &str, extensions: &BTreeSet<String>) -> Result<()> {
    let source = ctx.repos.sources.find_by_id(source_name).await?;
    let conn = ctx.connector.connect_source(&source).await?;
    let visitor = AssetVisitor {
        assets: ctx.repos.assets.as_ref(),
        source: source_name,
        owner: ctx.owner(),
        succeeded: AtomicBool::new(false),
        failure: Mutex::new(None),
    };

    ctx.scanner.scan(conn, extensions, &visitor).await;

    if let Some(message) = visitor.failure.lock().await.take() {
        return Err(StorageError::Scan {
            name: source_name.to_string(),
            message,
        }
        .into());
    }
    if !visitor.succeeded.load(Ordering::SeqCst) {
        warn!(source = %source_name, "scan finished without success");
        return Err(StorageError::Scan {
            name: source_name.to_string(),
            message: "finished without success".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Registers each matched file as a pending asset, once.
struct AssetVisitor<'a> {
    assets: &'a dyn Repository<SourceAsset>,
    source: &'a str,
    owner: &'a str,
    succeeded: AtomicBool,
    failure: Mutex<Option<String>>,
}

#[async_trait]
impl ScanVisitor for AssetVisitor<'_> {
    async fn visit(&self, file: &FileMeta) -> std::result::Result<(), MediaflowError> {
        let name = asset_name(self.source, &file.name);
        if self.assets.safe_find_by_id(&name).await?.is_some() {
            return Ok(());
        }
        match self
            .assets
            .create(SourceAsset::discovered(self.source, &file.name, self.owner))
            .await
        {
            Ok(_) => {
                info!(asset = %name, size = file.size, "discovered asset");
                Ok(())
            }
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn success(&self) {
        self.succeeded.store(true, Ordering::SeqCst);
    }

    async fn error(&self, err: &StorageError) {
        *self.failure.lock().await = Some(err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock, SharedClock};
    use crate::config::CoordinatorConfig;
    use crate::model::{AutoscanSettings, LockState, Media, Source};
    use crate::error::RepoError;
    use crate::profile::OperationRegistry;
    use crate::repo::{MemoryRepository, RepositorySet};

    const NOW: i64 = 1_700_000_000_000;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: std::path::PathBuf,
        clock: Arc<ManualClock>,
        ctx: Arc<StageContext>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("inbox");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.txt"), "one two").unwrap();
        std::fs::write(root.join("sub/B.TXT"), "three").unwrap();
        std::fs::write(root.join("skip.bin"), "x").unwrap();

        let clock = Arc::new(ManualClock::new(NOW));
        let shared: SharedClock = clock.clone();
        let repos = RepositorySet::in_memory(shared.clone());
        repos
            .sources
            .create(Source::local("inbox", root.to_str().unwrap()))
            .await
            .unwrap();
        repos.media.create(Media::new("text", &["txt"])).await.unwrap();
        repos
            .libraries
            .create(Library::new("docs", "text", &["inbox"]))
            .await
            .unwrap();

        let config = CoordinatorConfig {
            system_name: "scanner-1".into(),
            ..Default::default()
        };
        let ctx = Arc::new(StageContext::new(config, repos, shared, OperationRegistry::new()));
        Fixture {
            _dir: dir,
            root,
            clock,
            ctx,
        }
    }

    #[tokio::test]
    async fn test_scan_registers_matching_files_once() {
        let f = fixture().await;
        let scan = schedule_library_scan(&f.ctx, "docs", NOW).await.unwrap();
        scan_library(&f.ctx, &scan).await.unwrap();

        let assets = f.ctx.repos.assets.find_all().await.unwrap();
        let names: Vec<_> = assets.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["inbox>a.txt", "inbox>sub/B.TXT"]);
        assert!(assets.iter().all(|a| a.lock.status == Some(JobStatus::Pending)));

        let stored = f.ctx.repos.scans.find_by_id(&scan.scan_id).await.unwrap();
        assert!(stored.lock.is_finished());
        assert_eq!(stored.error_count, 0);

        // A second scan of the same files adds nothing.
        let again = schedule_library_scan(&f.ctx, "docs", NOW + 1_000).await.unwrap();
        scan_library(&f.ctx, &again).await.unwrap();
        assert_eq!(f.ctx.repos.assets.find_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shared_source_scans_union_of_extensions() {
        let f = fixture().await;
        std::fs::write(f.root.join("clip.mp4"), "v").unwrap();
        f.ctx.repos.media.create(Media::new("video", &["mp4"])).await.unwrap();
        f.ctx
            .repos
            .libraries
            .create(Library::new("clips", "video", &["inbox"]))
            .await
            .unwrap();

        let scan = schedule_library_scan(&f.ctx, "docs", NOW).await.unwrap();
        scan_library(&f.ctx, &scan).await.unwrap();

        let found = f.ctx.repos.assets.safe_find_by_id("inbox>clip.mp4").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_missing_source_counts_error_and_finishes() {
        let f = fixture().await;
        let mut lib = f.ctx.repos.libraries.find_by_id("docs").await.unwrap();
        lib.sources.push("gone".into());
        f.ctx.repos.libraries.update(lib).await.unwrap();

        let scan = schedule_library_scan(&f.ctx, "docs", NOW).await.unwrap();
        scan_library(&f.ctx, &scan).await.unwrap();

        let stored = f.ctx.repos.scans.find_by_id(&scan.scan_id).await.unwrap();
        assert!(stored.lock.is_finished());
        assert_eq!(stored.error_count, 1);
        assert_eq!(f.ctx.repos.assets.find_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_poll_runs_due_scans_and_schedules_autoscan() {
        let f = fixture().await;
        let worker = ScanWorker::new(f.ctx.clone());
        let stop = CancellationToken::new();

        let early = schedule_library_scan(&f.ctx, "docs", NOW - 10).await.unwrap();
        let later = schedule_library_scan(&f.ctx, "docs", NOW + 60_000).await.unwrap();
        assert!(!worker.poll_once(&stop).await.unwrap());

        let early = f.ctx.repos.scans.find_by_id(&early.scan_id).await.unwrap();
        let later = f.ctx.repos.scans.find_by_id(&later.scan_id).await.unwrap();
        assert!(early.lock.is_finished());
        assert_eq!(later.lock.status, Some(JobStatus::Pending));

        // Turn on autoscan: the future scan already covers the library.
        let mut lib = f.ctx.repos.libraries.find_by_id("docs").await.unwrap();
        lib.autoscan_enabled = true;
        lib.autoscan = Some(AutoscanSettings {
            interval_ms: Some(60_000),
            initial_delay_ms: None,
        });
        f.ctx.repos.libraries.update(lib).await.unwrap();
        f.ctx
            .repos
            .local_config
            .create(LocalConfig {
                autoscan_enabled: true,
                scan_poll_interval_ms: Some(250),
                ..Default::default()
            })
            .await
            .unwrap();

        worker.poll_once(&stop).await.unwrap();
        assert_eq!(f.ctx.repos.scans.find_all().await.unwrap().len(), 2);
        assert_eq!(worker.poll_interval(), Duration::from_millis(250));

        // Once that scan has run, a new one is scheduled one interval out.
        f.clock.advance(Duration::from_secs(61));
        worker.poll_once(&stop).await.unwrap();
        let scans = f.ctx.repos.scans.find_all().await.unwrap();
        assert_eq!(scans.len(), 3);
        let newest = scans.last().unwrap();
        assert_eq!(newest.scheduled, Some(f.clock.now() + 60_000));
        assert_eq!(newest.lock.status, Some(JobStatus::Pending));
    }

    #[tokio::test]
    async fn test_sweep_purges_and_force_finishes() {
        let f = fixture().await;
        let scans = f.ctx.repos.scans.clone();
        let week = f.ctx.config.scan_expiration_ms as i64;
        let hour = f.ctx.config.scan_lock_timeout_ms as i64;

        let mut old_finished = LibraryScan::scheduled("1-docs".into(), "docs", 0);
        old_finished.lock = LockState {
            status: Some(JobStatus::Finished),
            finished: Some(NOW - week - 1),
            ..Default::default()
        };
        let mut abandoned = LibraryScan::scheduled("2-docs".into(), "docs", 0);
        abandoned.lock = LockState::started_by("dead", NOW - hour - 1);
        let mut live = LibraryScan::scheduled("3-docs".into(), "docs", 0);
        live.lock = LockState::started_by("busy", NOW - 5);
        let mut ancient = LibraryScan::scheduled("4-docs".into(), "docs", 0);
        ancient.lock = LockState::started_by("dead", NOW - week - 1);
        for scan in [old_finished, abandoned, live, ancient] {
            scans.create(scan).await.unwrap();
        }

        ScanWorker::new(f.ctx.clone()).sweep().await.unwrap();

        assert!(scans.safe_find_by_id("1-docs").await.unwrap().is_none());
        assert!(scans.safe_find_by_id("4-docs").await.unwrap().is_none());
        let abandoned = scans.find_by_id("2-docs").await.unwrap();
        assert!(abandoned.lock.is_finished());
        assert_eq!(abandoned.error_count, 1);
        let live = scans.find_by_id("3-docs").await.unwrap();
        assert_eq!(live.lock.status, Some(JobStatus::Started));
    }

    #[tokio::test]
    async fn test_missing_library_finishes_scan_with_error() {
        let f = fixture().await;
        let scan = schedule_library_scan(&f.ctx, "removed", NOW).await.unwrap();
        scan_library(&f.ctx, &scan).await.unwrap();

        let stored = f.ctx.repos.scans.find_by_id(&scan.scan_id).await.unwrap();
        assert!(stored.lock.is_finished());
        assert_eq!(stored.error_count, 1);

        // No longer due, so the next pass leaves it alone.
        let worker = ScanWorker::new(f.ctx.clone());
        worker.poll_once(&CancellationToken::new()).await.unwrap();
        let again = f.ctx.repos.scans.find_by_id(&scan.scan_id).await.unwrap();
        assert_eq!(again.meta.version, stored.meta.version);
    }

    /// Scan store whose writes to one record always fail.
    struct BrokenRecord {
        inner: MemoryRepository<LibraryScan>,
        broken: String,
    }

    #[async_trait]
    impl Repository<LibraryScan> for BrokenRecord {
        async fn create(&self, record: LibraryScan) -> std::result::Result<LibraryScan, RepoError> {
            self.inner.create(record).await
        }

        async fn update(&self, record: LibraryScan) -> std::result::Result<LibraryScan, RepoError> {
            if record.scan_id == self.broken {
                return Err(RepoError::LockPoisoned);
            }
            self.inner.update(record).await
        }

        async fn safe_find_by_id(&self, id: &str) -> std::result::Result<Option<LibraryScan>, RepoError> {
            self.inner.safe_find_by_id(id).await
        }

        async fn find_all(&self) -> std::result::Result<Vec<LibraryScan>, RepoError> {
            self.inner.find_all().await
        }

        async fn purge(&self, id: &str) -> std::result::Result<bool, RepoError> {
            self.inner.purge(id).await
        }
    }

    #[tokio::test]
    async fn test_failed_scan_does_not_block_later_due_scans() {
        let f = fixture().await;
        let shared: SharedClock = f.clock.clone();
        let first = naming::scan_id("docs", NOW - 20);
        let mut ctx = (*f.ctx).clone();
        ctx.repos.scans = Arc::new(BrokenRecord {
            inner: MemoryRepository::new(shared),
            broken: first.clone(),
        });
        let ctx = Arc::new(ctx);

        schedule_library_scan(&ctx, "docs", NOW - 20).await.unwrap();
        let second = schedule_library_scan(&ctx, "docs", NOW - 10).await.unwrap();
        let worker = ScanWorker::new(ctx.clone());
        assert!(!worker.poll_once(&CancellationToken::new()).await.unwrap());

        let failed = ctx.repos.scans.find_by_id(&first).await.unwrap();
        assert_eq!(failed.lock.status, Some(JobStatus::Pending));
        let ran = ctx.repos.scans.find_by_id(&second.scan_id).await.unwrap();
        assert!(ran.lock.is_finished());
        assert_eq!(ctx.repos.assets.find_all().await.unwrap().len(), 2);
    }
}
