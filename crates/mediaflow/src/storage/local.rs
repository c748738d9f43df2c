use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use walkdir::WalkDir;

use super::{FileMeta, Storage, VolumeConnector};
use crate::error::StorageError;
use crate::model::{Destination, Source};

/// A volume rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    name: String,
    root: PathBuf,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(name: &str, root: P) -> Self {
        Self {
            name: name.to_string(),
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a volume-relative path into the root, refusing `..` escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn relative_name(&self, full: &Path) -> String {
        full.strip_prefix(&self.root)
            .unwrap_or(full)
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    fn io_error(path: &str, source: std::io::Error) -> StorageError {
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}

fn mtime_millis(meta: &std::fs::Metadata) -> Option<i64> {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_millis()).ok())
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn metadata(&self, path: &str) -> Result<FileMeta, StorageError> {
        let full = self.resolve(path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| Self::io_error(path, e))?;
        if meta.is_dir() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(FileMeta {
            name: self.relative_name(&full),
            size: meta.len(),
            mtime: mtime_millis(&meta),
        })
    }

    async fn read(
        &self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, StorageError> {
        let full = self.resolve(path)?;
        let mut file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| Self::io_error(path, e))?;
        let copied = tokio::io::copy(&mut file, &mut *sink)
            .await
            .map_err(|e| Self::io_error(path, e))?;
        sink.flush().await.map_err(|e| Self::io_error(path, e))?;
        Ok(copied)
    }

    async fn write(
        &self,
        path: &str,
        data: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, StorageError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_error(path, e))?;
        }

        // Readers never see a partial file: write beside it, then rename.
        let staging = full.with_file_name(format!(
            ".{}.{}.part",
            full.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            uuid::Uuid::new_v4()
        ));
        let mut file = tokio::fs::File::create(&staging)
            .await
            .map_err(|e| Self::io_error(path, e))?;
        let written = match tokio::io::copy(&mut *data, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(Self::io_error(path, e));
            }
        };
        file.flush().await.map_err(|e| Self::io_error(path, e))?;
        drop(file);

        tokio::fs::rename(&staging, &full)
            .await
            .map_err(|e| Self::io_error(path, e))?;
        Ok(written)
    }

    async fn list(&self, path: &str, recursive: bool) -> Result<Vec<FileMeta>, StorageError> {
        let start = self.resolve(path)?;
        if !start.is_dir() {
            return Err(StorageError::NotFound(path.to_string()));
        }

        let this = self.clone();
        let label = path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut walker = WalkDir::new(&start).min_depth(1).sort_by_file_name();
            if !recursive {
                walker = walker.max_depth(1);
            }

            let mut files = Vec::new();
            for entry in walker {
                let entry = entry.map_err(|e| StorageError::Scan {
                    name: this.name.clone(),
                    message: e.to_string(),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy();
                if file_name.starts_with('.') && file_name.ends_with(".part") {
                    continue;
                }
                let meta = entry.metadata().map_err(|e| StorageError::Scan {
                    name: this.name.clone(),
                    message: e.to_string(),
                })?;
                files.push(FileMeta {
                    name: this.relative_name(entry.path()),
                    size: meta.len(),
                    mtime: mtime_millis(&meta),
                });
            }
            Ok(files)
        })
        .await
        .map_err(|e| StorageError::Scan {
            name: label,
            message: e.to_string(),
        })?
    }
}

/// Connects `type: local` volumes whose `path` parameter names the root.
#[derive(Debug, Default, Clone)]
pub struct LocalConnector;

impl LocalConnector {
    fn connect(
        name: &str,
        kind: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn Storage>, StorageError> {
        if kind != "local" {
            return Err(StorageError::UnsupportedVolume {
                name: name.to_string(),
                kind: kind.to_string(),
            });
        }
        let root = params
            .get("path")
            .ok_or_else(|| StorageError::MissingParameter {
                name: name.to_string(),
                param: "path".to_string(),
            })?;
        Ok(Arc::new(LocalStorage::new(name, root)))
    }
}

#[async_trait]
impl VolumeConnector for LocalConnector {
    async fn connect_source(&self, source: &Source) -> Result<Arc<dyn Storage>, StorageError> {
        Self::connect(&source.name, &source.kind, &source.params)
    }

    async fn connect_destination(
        &self,
        destination: &Destination,
    ) -> Result<Arc<dyn Storage>, StorageError> {
        Self::connect(&destination.name, &destination.kind, &destination.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_metadata() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new("dest", dir.path());

        let mut data: &[u8] = b"hello world";
        let written = storage.write("a/b/file.txt", &mut data).await.unwrap();
        assert_eq!(written, 11);

        let meta = storage.metadata("a/b/file.txt").await.unwrap();
        assert_eq!(meta.name, "a/b/file.txt");
        assert_eq!(meta.size, 11);

        let mut out = Vec::new();
        storage.read("/a/b/file.txt", &mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_safe_metadata_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new("src", dir.path());
        assert!(storage.safe_metadata("nope.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_parent_escape() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new("src", dir.path());
        let err = storage.metadata("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_list_recursive_and_flat() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("top.txt"), "1").unwrap();
        std::fs::write(dir.path().join("sub/deep.txt"), "22").unwrap();
        let storage = LocalStorage::new("src", dir.path());

        let all = storage.list("", true).await.unwrap();
        let names: Vec<_> = all.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["sub/deep.txt", "top.txt"]);

        let flat = storage.list("", false).await.unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].name, "top.txt");
    }

    #[tokio::test]
    async fn test_connector_requires_local_path() {
        let connector = LocalConnector;
        let mut source = Source::local("src", "/tmp");
        assert!(connector.connect_source(&source).await.is_ok());

        source.params.clear();
        assert!(matches!(
            connector.connect_source(&source).await.unwrap_err(),
            StorageError::MissingParameter { .. }
        ));

        source.kind = "s3".into();
        assert!(matches!(
            connector.connect_source(&source).await.unwrap_err(),
            StorageError::UnsupportedVolume { .. }
        ));
    }
}
