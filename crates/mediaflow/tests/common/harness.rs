//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` owns a temp directory holding one source volume, two
//! destination volumes and the local download/asset directories, plus an
//! in-memory repository seeded with a `docs` library of text files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use mediaflow::config::Catalog;
use mediaflow::model::{Destination, Library, Media, MediaProfile, Source};
use mediaflow::{
    seed_catalog, CoordinatorConfig, Operation, OperationRegistry, RepositorySet, SharedClock,
    StageContext, SystemClock,
};

use super::operations::{Uppercase, WordCount};

pub const LIBRARY: &str = "docs";
pub const SOURCE: &str = "inbox";
pub const DESTINATIONS: [&str; 2] = ["archive", "mirror"];

pub struct TestHarness {
    temp_dir: TempDir,
    /// Root of the `inbox` source volume.
    pub source_dir: PathBuf,
    pub clock: SharedClock,
    pub repos: RepositorySet,
}

impl TestHarness {
    /// Creates the directories and seeds sources, destinations and the
    /// `text` media. Profiles are added per test.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_dir = temp_dir.path().join("source");
        std::fs::create_dir_all(&source_dir).expect("Failed to create source dir");

        let mut destinations = Vec::new();
        for name in DESTINATIONS {
            let dir = temp_dir.path().join(name);
            std::fs::create_dir_all(&dir).expect("Failed to create destination dir");
            destinations.push(Destination::local(name, dir.to_str().unwrap(), true));
        }

        let clock: SharedClock = Arc::new(SystemClock);
        let repos = RepositorySet::in_memory(clock.clone());
        let catalog = Catalog {
            sources: vec![Source::local(SOURCE, source_dir.to_str().unwrap())],
            destinations,
            media: vec![Media::new("text", &["txt"])],
            profiles: Vec::new(),
            libraries: vec![Library::new(LIBRARY, "text", &[SOURCE])],
            local: None,
        };
        seed_catalog(&repos, &catalog)
            .await
            .expect("Failed to seed catalog");

        Self {
            temp_dir,
            source_dir,
            clock,
            repos,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn destination_dir(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes a file into the source volume.
    pub fn write_source(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.source_dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create source subdir");
        }
        std::fs::write(&path, content).expect("Failed to write source file");
        path
    }

    pub async fn add_profile(&self, profile: MediaProfile) {
        self.repos
            .profiles
            .create(profile)
            .await
            .expect("Failed to create profile");
    }

    /// Config with short intervals, working dirs inside the temp dir.
    pub fn config(&self, system_name: &str) -> CoordinatorConfig {
        CoordinatorConfig {
            system_name: system_name.to_string(),
            download_dir: self.temp_dir.path().join("downloads"),
            asset_dir: self.temp_dir.path().join("assets"),
            scan_poll_interval_ms: 20,
            analyzer_poll_interval_ms: 20,
            transformer_poll_interval_ms: 20,
            uploader_poll_interval_ms: 20,
            upload_wait_interval_ms: 20,
            download_poll_interval_ms: 20,
            ..Default::default()
        }
    }

    pub fn operations() -> OperationRegistry {
        let mut operations = OperationRegistry::new();
        operations
            .register(Operation::function("wordCount", true, WordCount))
            .register(Operation::function("uppercase", false, Uppercase));
        operations
    }

    pub fn context(&self, config: CoordinatorConfig) -> StageContext {
        StageContext::new(config, self.repos.clone(), self.clock.clone(), Self::operations())
    }
}

/// Polls `check` until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
