//! Claiming work by writing ownership onto the work record itself.
//!
//! A claim either creates the target record already `started`, or moves an
//! existing pending or stale record to `started` with an optimistic update.
//! Every write is followed by a re-read; the claim only counts if the stored
//! record still carries what this owner wrote.

use std::time::Duration;

use crate::clock::{millis, Clock};
use crate::error::RepoError;
use crate::model::{JobStatus, LockState, Lockable};
use crate::repo::Repository;

/// Tries to take ownership of `target_id` for `owner`.
///
/// Returns the claimed record, or `None` when the target is finished, held by
/// a live owner, or another writer won the race.
pub async fn acquire_lock<T: Lockable>(
    owner: &str,
    clock: &dyn Clock,
    repo: &dyn Repository<T>,
    target_id: &str,
    timeout: Duration,
) -> Result<Option<T>, RepoError> {
    let now = clock.now();
    let Some(current) = repo.safe_find_by_id(target_id).await? else {
        let mut record = T::lock_record(target_id);
        *record.lock_mut() = LockState::started_by(owner, now);
        match repo.create(record).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                tracing::debug!(id = %target_id, owner, "lost create race");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        return verify(owner, repo, target_id, now).await;
    };

    let lock = current.lock();
    if lock.is_finished() {
        return Ok(None);
    }
    if let (Some(JobStatus::Started), Some(started)) = (lock.status, lock.started) {
        if now - started <= millis(timeout) {
            return Ok(None);
        }
        tracing::info!(
            id = %target_id,
            owner,
            previous = lock.owner.as_deref().unwrap_or(""),
            age_ms = now - started,
            "reclaiming stale lock"
        );
    }

    claim(owner, repo, current, now).await
}

async fn claim<T: Lockable>(
    owner: &str,
    repo: &dyn Repository<T>,
    mut record: T,
    now: i64,
) -> Result<Option<T>, RepoError> {
    let target_id = record.id().to_string();
    *record.lock_mut() = LockState::started_by(owner, now);
    match repo.update(record).await {
        Ok(_) => verify(owner, repo, &target_id, now).await,
        Err(e) if e.is_conflict() => Ok(None),
        Err(e) => Err(e),
    }
}

async fn verify<T: Lockable>(
    owner: &str,
    repo: &dyn Repository<T>,
    target_id: &str,
    started: i64,
) -> Result<Option<T>, RepoError> {
    let Some(stored) = repo.safe_find_by_id(target_id).await? else {
        return Ok(None);
    };
    let lock = stored.lock();
    let ours = lock.owner.as_deref() == Some(owner)
        && lock.status == Some(JobStatus::Started)
        && lock.started == Some(started);
    Ok(ours.then_some(stored))
}

/// Marks a held lock finished.
pub async fn finish_lock<T: Lockable>(
    owner: &str,
    clock: &dyn Clock,
    repo: &dyn Repository<T>,
    mut record: T,
) -> Result<T, RepoError> {
    record.lock_mut().finish(owner, clock.now());
    repo.update(record).await
}
