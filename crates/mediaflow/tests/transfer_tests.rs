//! Downloads and uploads against local volumes.

use std::sync::Arc;
use std::time::Duration;

use assert_fs::prelude::*;
use tokio_util::sync::CancellationToken;

use mediaflow::model::{Destination, JobStatus, LockState, Source, UploadJob};
use mediaflow::storage::LocalConnector;
use mediaflow::transfer::{download_source_asset, upload_asset, DownloadRequest, UploadOutcome};
use mediaflow::{RepositorySet, SharedClock, SystemClock};

fn upload_job(local: &std::path::Path) -> UploadJob {
    UploadJob {
        name: "archive~thumb~out.txt~x".into(),
        local_path: local.to_string_lossy().into_owned(),
        asset: "inbox>shows/ep1.txt".into(),
        media: "text".into(),
        profile: "thumb".into(),
        destination: "archive".into(),
        size: 4,
        lock: LockState {
            status: Some(JobStatus::Pending),
            ..Default::default()
        },
        meta: Default::default(),
    }
}

#[tokio::test]
async fn test_download_reuses_complete_local_copy() {
    let dir = tempfile::TempDir::new().unwrap();
    let source_root = dir.path().join("source");
    std::fs::create_dir_all(source_root.join("shows")).unwrap();
    std::fs::write(source_root.join("shows/ep1.txt"), "episode one").unwrap();

    let clock: SharedClock = Arc::new(SystemClock);
    let repos = RepositorySet::in_memory(clock.clone());
    repos
        .sources
        .create(Source::local("inbox", source_root.to_str().unwrap()))
        .await
        .unwrap();

    let download_dir = dir.path().join("downloads");
    let request = DownloadRequest {
        download_dir: &download_dir,
        asset_name: "inbox>shows/ep1.txt",
        sources: repos.sources.as_ref(),
        connector: &LocalConnector,
        clock: clock.as_ref(),
        poll_interval: Duration::from_millis(10),
    };
    let stop = CancellationToken::new();

    let first = download_source_asset(&request, &stop).await.unwrap().unwrap();
    assert_eq!(std::fs::read_to_string(&first.path).unwrap(), "episode one");
    assert!(first.path.starts_with(&download_dir));
    assert_eq!(first.path.extension().unwrap(), "txt");
    let modified = std::fs::metadata(&first.path).unwrap().modified().unwrap();

    let second = download_source_asset(&request, &stop).await.unwrap().unwrap();
    assert_eq!(second.path, first.path);
    assert_eq!(std::fs::metadata(&second.path).unwrap().modified().unwrap(), modified);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_downloads_converge() {
    let dir = tempfile::TempDir::new().unwrap();
    let source_root = dir.path().join("source");
    std::fs::create_dir_all(source_root.join("shows")).unwrap();
    let body = "frame ".repeat(50_000);
    std::fs::write(source_root.join("shows/ep2.txt"), &body).unwrap();

    let clock: SharedClock = Arc::new(SystemClock);
    let repos = RepositorySet::in_memory(clock.clone());
    repos
        .sources
        .create(Source::local("inbox", source_root.to_str().unwrap()))
        .await
        .unwrap();

    let download_dir = dir.path().join("downloads");
    let request = DownloadRequest {
        download_dir: &download_dir,
        asset_name: "inbox>shows/ep2.txt",
        sources: repos.sources.as_ref(),
        connector: &LocalConnector,
        clock: clock.as_ref(),
        poll_interval: Duration::from_millis(10),
    };
    let stop = CancellationToken::new();

    let (a, b) = tokio::join!(
        download_source_asset(&request, &stop),
        download_source_asset(&request, &stop)
    );
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();
    assert_eq!(a.path, b.path);
    assert_eq!(std::fs::read_to_string(&a.path).unwrap(), body);
}

#[tokio::test]
async fn test_upload_skips_equal_sized_destination_file() {
    let dir = assert_fs::TempDir::new().unwrap();
    let dest_root = dir.child("archive");
    dest_root.create_dir_all().unwrap();
    let local = dir.child("out.txt");
    local.write_str("data").unwrap();

    let clock: SharedClock = Arc::new(SystemClock);
    let repos = RepositorySet::in_memory(clock);
    repos
        .destinations
        .create(Destination::local("archive", dest_root.path().to_str().unwrap(), true))
        .await
        .unwrap();
    let job = upload_job(local.path());

    let first = upload_asset(&job, repos.destinations.as_ref(), &LocalConnector)
        .await
        .unwrap();
    assert_eq!(first, UploadOutcome::Transferred(4));
    let delivered = dest_root.child("shows/ep1.txt/thumb/out.txt");
    delivered.assert("data");

    let second = upload_asset(&job, repos.destinations.as_ref(), &LocalConnector)
        .await
        .unwrap();
    assert_eq!(second, UploadOutcome::Skipped);

    local.write_str("new data").unwrap();
    let third = upload_asset(&job, repos.destinations.as_ref(), &LocalConnector)
        .await
        .unwrap();
    assert_eq!(third, UploadOutcome::Transferred(8));
    delivered.assert("new data");
}
