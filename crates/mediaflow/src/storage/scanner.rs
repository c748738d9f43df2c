use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{FileMeta, Storage};
use crate::error::{MediaflowError, StorageError};
use crate::model::asset::file_ext_without_dot;

/// Receives the files a scan finds.
///
/// Exactly one of `success` or `error` is called, then `done`.
#[async_trait]
pub trait ScanVisitor: Send + Sync {
    async fn visit(&self, file: &FileMeta) -> Result<(), MediaflowError>;
    async fn success(&self) {}
    async fn error(&self, _err: &StorageError) {}
    async fn done(&self) {}
}

#[async_trait]
pub trait StorageScanner: Send + Sync {
    /// Walks `storage` and visits every file whose extension is in `extensions`
    /// (lowercase, no dot). An empty set matches nothing.
    async fn scan(
        &self,
        storage: Arc<dyn Storage>,
        extensions: &BTreeSet<String>,
        visitor: &dyn ScanVisitor,
    );
}

/// Recursive scanner built on [`Storage::list`].
#[derive(Debug, Default, Clone)]
pub struct WalkingScanner;

#[async_trait]
impl StorageScanner for WalkingScanner {
    async fn scan(
        &self,
        storage: Arc<dyn Storage>,
        extensions: &BTreeSet<String>,
        visitor: &dyn ScanVisitor,
    ) {
        match walk(storage.as_ref(), extensions, visitor).await {
            Ok(()) => visitor.success().await,
            Err(e) => visitor.error(&e).await,
        }
        visitor.done().await;
    }
}

async fn walk(
    storage: &dyn Storage,
    extensions: &BTreeSet<String>,
    visitor: &dyn ScanVisitor,
) -> Result<(), StorageError> {
    let files = storage.list("", true).await?;
    let mut failures = 0usize;
    let mut matched = 0usize;

    for file in &files {
        let ext = file_ext_without_dot(&file.name).to_lowercase();
        if !extensions.contains(&ext) {
            continue;
        }
        matched += 1;
        if let Err(e) = visitor.visit(file).await {
            warn!(volume = %storage.name(), file = %file.name, "visit failed: {}", e);
            failures += 1;
        }
    }

    debug!(
        volume = %storage.name(),
        listed = files.len(),
        matched,
        failures,
        "scan walked volume"
    );
    if failures > 0 {
        return Err(StorageError::Scan {
            name: storage.name().to_string(),
            message: format!("{} of {} files could not be recorded", failures, matched),
        });
    }
    Ok(())
}
