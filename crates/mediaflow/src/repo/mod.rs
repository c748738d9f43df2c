//! Typed record repositories with optimistic concurrency.
//!
//! `create` fails when the key already exists and `update` only succeeds when
//! the caller's `meta.version` still matches the stored one. Lock claims rely
//! on both.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::clock::SharedClock;
use crate::db::Database;
use crate::error::RepoError;
use crate::model::{
    Destination, Library, LibraryScan, LocalConfig, Media, MediaProfile, ProfileJob, Record,
    Source, SourceAsset, UploadJob,
};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

/// Extra predicate applied after the field match.
pub type Predicate<'a, T> = &'a (dyn Fn(&T) -> bool + Send + Sync);

#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    /// Stores a new record. Fails with [`RepoError::AlreadyExists`] if the id is taken.
    async fn create(&self, record: T) -> Result<T, RepoError>;

    /// Replaces a stored record if its version still matches `record.meta().version`.
    async fn update(&self, record: T) -> Result<T, RepoError>;

    async fn safe_find_by_id(&self, id: &str) -> Result<Option<T>, RepoError>;

    /// All records in creation order.
    async fn find_all(&self) -> Result<Vec<T>, RepoError>;

    /// Removes a record. Returns whether anything was removed.
    async fn purge(&self, id: &str) -> Result<bool, RepoError>;

    async fn find_by_id(&self, id: &str) -> Result<T, RepoError> {
        self.safe_find_by_id(id)
            .await?
            .ok_or_else(|| RepoError::NotFound {
                type_name: T::TYPE_NAME,
                id: id.to_string(),
            })
    }

    /// Records whose `field` equals `value` (or contains it, for array fields).
    async fn find_by(
        &self,
        field: &str,
        value: &Value,
        predicate: Option<Predicate<'_, T>>,
    ) -> Result<Vec<T>, RepoError> {
        let mut found = Vec::new();
        for record in self.find_all().await? {
            if field_matches(&record, field, value)? && predicate.map_or(true, |p| p(&record)) {
                found.push(record);
            }
        }
        Ok(found)
    }

    async fn safe_find_first_by(
        &self,
        field: &str,
        value: &Value,
        predicate: Option<Predicate<'_, T>>,
    ) -> Result<Option<T>, RepoError> {
        Ok(self.find_by(field, value, predicate).await?.into_iter().next())
    }
}

pub(crate) fn field_matches<T: Record>(
    record: &T,
    field: &str,
    value: &Value,
) -> Result<bool, RepoError> {
    let json = serde_json::to_value(record).map_err(|source| RepoError::Serialization {
        type_name: T::TYPE_NAME,
        source,
    })?;
    Ok(match json.get(field) {
        Some(Value::Array(items)) if !value.is_array() => items.contains(value),
        Some(found) => found == value,
        None => value.is_null(),
    })
}

/// One repository per record type, shared by every stage of a coordinator.
#[derive(Clone)]
pub struct RepositorySet {
    pub sources: Arc<dyn Repository<Source>>,
    pub destinations: Arc<dyn Repository<Destination>>,
    pub media: Arc<dyn Repository<Media>>,
    pub profiles: Arc<dyn Repository<MediaProfile>>,
    pub libraries: Arc<dyn Repository<Library>>,
    pub scans: Arc<dyn Repository<LibraryScan>>,
    pub assets: Arc<dyn Repository<SourceAsset>>,
    pub profile_jobs: Arc<dyn Repository<ProfileJob>>,
    pub upload_jobs: Arc<dyn Repository<UploadJob>>,
    pub local_config: Arc<dyn Repository<LocalConfig>>,
}

impl RepositorySet {
    pub fn in_memory(clock: SharedClock) -> Self {
        Self {
            sources: Arc::new(MemoryRepository::new(clock.clone())),
            destinations: Arc::new(MemoryRepository::new(clock.clone())),
            media: Arc::new(MemoryRepository::new(clock.clone())),
            profiles: Arc::new(MemoryRepository::new(clock.clone())),
            libraries: Arc::new(MemoryRepository::new(clock.clone())),
            scans: Arc::new(MemoryRepository::new(clock.clone())),
            assets: Arc::new(MemoryRepository::new(clock.clone())),
            profile_jobs: Arc::new(MemoryRepository::new(clock.clone())),
            upload_jobs: Arc::new(MemoryRepository::new(clock.clone())),
            local_config: Arc::new(MemoryRepository::new(clock)),
        }
    }

    pub fn sqlite(db: Database, clock: SharedClock) -> Self {
        Self {
            sources: Arc::new(SqliteRepository::new(db.clone(), clock.clone())),
            destinations: Arc::new(SqliteRepository::new(db.clone(), clock.clone())),
            media: Arc::new(SqliteRepository::new(db.clone(), clock.clone())),
            profiles: Arc::new(SqliteRepository::new(db.clone(), clock.clone())),
            libraries: Arc::new(SqliteRepository::new(db.clone(), clock.clone())),
            scans: Arc::new(SqliteRepository::new(db.clone(), clock.clone())),
            assets: Arc::new(SqliteRepository::new(db.clone(), clock.clone())),
            profile_jobs: Arc::new(SqliteRepository::new(db.clone(), clock.clone())),
            upload_jobs: Arc::new(SqliteRepository::new(db.clone(), clock.clone())),
            local_config: Arc::new(SqliteRepository::new(db, clock)),
        }
    }
}

/// Creates the record, or overwrites the stored one keeping its version chain.
pub async fn upsert<T: Record>(repo: &dyn Repository<T>, mut record: T) -> Result<T, RepoError> {
    match repo.safe_find_by_id(record.id()).await? {
        Some(existing) => {
            *record.meta_mut() = existing.meta().clone();
            repo.update(record).await
        }
        None => repo.create(record).await,
    }
}
