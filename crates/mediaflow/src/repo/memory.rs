use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::Repository;
use crate::clock::SharedClock;
use crate::error::RepoError;
use crate::model::Record;

struct Entry<T> {
    seq: u64,
    record: T,
}

struct State<T> {
    entries: HashMap<String, Entry<T>>,
    next_seq: u64,
}

/// Process-local repository. Every write is serialized by one lock, so
/// version checks are exact.
pub struct MemoryRepository<T> {
    state: RwLock<State<T>>,
    clock: SharedClock,
}

impl<T: Record> MemoryRepository<T> {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: RwLock::new(State {
                entries: HashMap::new(),
                next_seq: 0,
            }),
            clock,
        }
    }
}

#[async_trait]
impl<T: Record> Repository<T> for MemoryRepository<T> {
    async fn create(&self, mut record: T) -> Result<T, RepoError> {
        let now = self.clock.now();
        let mut state = self.state.write().map_err(|_| RepoError::LockPoisoned)?;
        if state.entries.contains_key(record.id()) {
            return Err(RepoError::AlreadyExists {
                type_name: T::TYPE_NAME,
                id: record.id().to_string(),
            });
        }

        let meta = record.meta_mut();
        meta.version = 1;
        meta.ctime = now;
        meta.mtime = now;

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            record.id().to_string(),
            Entry {
                seq,
                record: record.clone(),
            },
        );
        Ok(record)
    }

    async fn update(&self, mut record: T) -> Result<T, RepoError> {
        let now = self.clock.now();
        let mut state = self.state.write().map_err(|_| RepoError::LockPoisoned)?;
        let entry = state
            .entries
            .get_mut(record.id())
            .ok_or_else(|| RepoError::NotFound {
                type_name: T::TYPE_NAME,
                id: record.id().to_string(),
            })?;

        let stored = entry.record.meta();
        if stored.version != record.meta().version {
            return Err(RepoError::VersionConflict {
                type_name: T::TYPE_NAME,
                id: record.id().to_string(),
                expected: record.meta().version,
                found: stored.version,
            });
        }

        let ctime = stored.ctime;
        let meta = record.meta_mut();
        meta.version += 1;
        meta.ctime = ctime;
        meta.mtime = now;
        entry.record = record.clone();
        Ok(record)
    }

    async fn safe_find_by_id(&self, id: &str) -> Result<Option<T>, RepoError> {
        let state = self.state.read().map_err(|_| RepoError::LockPoisoned)?;
        Ok(state.entries.get(id).map(|e| e.record.clone()))
    }

    async fn find_all(&self) -> Result<Vec<T>, RepoError> {
        let state = self.state.read().map_err(|_| RepoError::LockPoisoned)?;
        let mut entries: Vec<&Entry<T>> = state.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries.into_iter().map(|e| e.record.clone()).collect())
    }

    async fn purge(&self, id: &str) -> Result<bool, RepoError> {
        let mut state = self.state.write().map_err(|_| RepoError::LockPoisoned)?;
        Ok(state.entries.remove(id).is_some())
    }
}
