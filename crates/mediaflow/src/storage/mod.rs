//! Volumes that sources are read from and destinations written to.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::StorageError;
use crate::model::{Destination, Source};

pub mod local;
pub mod scanner;

pub use local::{LocalConnector, LocalStorage};
pub use scanner::{ScanVisitor, StorageScanner, WalkingScanner};

/// Metadata for one file on a volume. `name` is relative to the volume root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    /// Modification time (epoch millis), when the volume reports one.
    pub mtime: Option<i64>,
}

#[async_trait]
pub trait Storage: Send + Sync + Debug {
    fn name(&self) -> &str;

    async fn metadata(&self, path: &str) -> Result<FileMeta, StorageError>;

    /// Like [`Storage::metadata`] but a missing file is `None`.
    async fn safe_metadata(&self, path: &str) -> Result<Option<FileMeta>, StorageError> {
        match self.metadata(path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Streams the file at `path` into `sink`. Returns bytes copied.
    async fn read(
        &self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, StorageError>;

    /// Replaces the file at `path` with everything `data` yields.
    async fn write(
        &self,
        path: &str,
        data: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, StorageError>;

    /// Files under `path` (the root when empty); directories are not listed.
    async fn list(&self, path: &str, recursive: bool) -> Result<Vec<FileMeta>, StorageError>;
}

/// Turns stored volume records into live connections.
#[async_trait]
pub trait VolumeConnector: Send + Sync {
    async fn connect_source(&self, source: &Source) -> Result<Arc<dyn Storage>, StorageError>;

    async fn connect_destination(
        &self,
        destination: &Destination,
    ) -> Result<Arc<dyn Storage>, StorageError>;
}
