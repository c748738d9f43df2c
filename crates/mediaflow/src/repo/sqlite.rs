//! SQLite-backed repository: one `records` table keyed by (type, id).

use std::marker::PhantomData;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use super::Repository;
use crate::clock::SharedClock;
use crate::db::{Database, DatabaseError};
use crate::error::RepoError;
use crate::model::{Record, RecordMeta};

pub struct SqliteRepository<T> {
    db: Database,
    clock: SharedClock,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> SqliteRepository<T> {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self {
            db,
            clock,
            _marker: PhantomData,
        }
    }

    fn encode(record: &T) -> Result<String, RepoError> {
        serde_json::to_string(record).map_err(|source| RepoError::Serialization {
            type_name: T::TYPE_NAME,
            source,
        })
    }

    fn decode(body: &str, meta: RecordMeta) -> Result<T, RepoError> {
        let mut record: T =
            serde_json::from_str(body).map_err(|source| RepoError::Serialization {
                type_name: T::TYPE_NAME,
                source,
            })?;
        *record.meta_mut() = meta;
        Ok(record)
    }

    fn stored_version(&self, id: &str) -> Result<Option<u64>, RepoError> {
        let version = self.db.with_conn(|conn| {
            let v: Option<i64> = conn
                .query_row(
                    "SELECT version FROM records WHERE type_name = ?1 AND id = ?2",
                    params![T::TYPE_NAME, id],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(v)
        })?;
        Ok(version.map(|v| v as u64))
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[async_trait]
impl<T: Record> Repository<T> for SqliteRepository<T> {
    async fn create(&self, mut record: T) -> Result<T, RepoError> {
        let now = self.clock.now();
        *record.meta_mut() = RecordMeta {
            version: 1,
            ctime: now,
            mtime: now,
        };
        let body = Self::encode(&record)?;

        let inserted = self.db.with_conn(|conn| {
            match conn.execute(
                "INSERT INTO records (type_name, id, version, body, ctime, mtime)
                 VALUES (?1, ?2, 1, ?3, ?4, ?4)",
                params![T::TYPE_NAME, record.id(), body, now],
            ) {
                Ok(_) => Ok(true),
                Err(e) if is_unique_violation(&e) => Ok(false),
                Err(e) => Err(DatabaseError::from(e)),
            }
        })?;

        if !inserted {
            return Err(RepoError::AlreadyExists {
                type_name: T::TYPE_NAME,
                id: record.id().to_string(),
            });
        }
        log::debug!("Created {} '{}'", T::TYPE_NAME, record.id());
        Ok(record)
    }

    async fn update(&self, mut record: T) -> Result<T, RepoError> {
        let now = self.clock.now();
        let expected = record.meta().version;
        record.meta_mut().version = expected + 1;
        record.meta_mut().mtime = now;
        let body = Self::encode(&record)?;

        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE records SET version = ?1, body = ?2, mtime = ?3
                 WHERE type_name = ?4 AND id = ?5 AND version = ?6",
                params![
                    (expected + 1) as i64,
                    body,
                    now,
                    T::TYPE_NAME,
                    record.id(),
                    expected as i64
                ],
            )?)
        })?;

        if changed == 0 {
            return Err(match self.stored_version(record.id())? {
                Some(found) => RepoError::VersionConflict {
                    type_name: T::TYPE_NAME,
                    id: record.id().to_string(),
                    expected,
                    found,
                },
                None => RepoError::NotFound {
                    type_name: T::TYPE_NAME,
                    id: record.id().to_string(),
                },
            });
        }

        Ok(record)
    }

    async fn safe_find_by_id(&self, id: &str) -> Result<Option<T>, RepoError> {
        let row = self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT body, version, ctime, mtime FROM records
                     WHERE type_name = ?1 AND id = ?2",
                    params![T::TYPE_NAME, id],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, i64>(1)?,
                            r.get::<_, i64>(2)?,
                            r.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row)
        })?;

        row.map(|(body, version, ctime, mtime)| {
            Self::decode(
                &body,
                RecordMeta {
                    version: version as u64,
                    ctime,
                    mtime,
                },
            )
        })
        .transpose()
    }

    async fn find_all(&self) -> Result<Vec<T>, RepoError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT body, version, ctime, mtime FROM records
                 WHERE type_name = ?1 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(params![T::TYPE_NAME], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, i64>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(body, version, ctime, mtime)| {
                Self::decode(
                    &body,
                    RecordMeta {
                        version: version as u64,
                        ctime,
                        mtime,
                    },
                )
            })
            .collect()
    }

    async fn purge(&self, id: &str) -> Result<bool, RepoError> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM records WHERE type_name = ?1 AND id = ?2",
                params![T::TYPE_NAME, id],
            )?)
        })?;
        if removed > 0 {
            log::debug!("Purged {} '{}'", T::TYPE_NAME, id);
        }
        Ok(removed > 0)
    }
}
