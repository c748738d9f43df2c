//! Records stored in the shared repository.
//!
//! Every record carries a [`RecordMeta`] with the version used for optimistic
//! updates. Records that double as lock targets embed a [`LockState`].

use std::fmt::{self, Debug};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub mod asset;
pub mod job;
pub mod library;
pub mod media;
pub mod volume;

pub use asset::SourceAsset;
pub use job::{ProfileJob, UploadJob};
pub use library::{AutoscanSettings, Library, LibraryScan, LocalConfig};
pub use media::{Media, MediaProfile};
pub use volume::{Destination, Source};

/// Repository bookkeeping, owned by the repository implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Zero until the record has been stored once.
    pub version: u64,
    /// Creation time (epoch millis).
    pub ctime: i64,
    /// Last modification time (epoch millis).
    pub mtime: i64,
}

pub trait Record: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    const TYPE_NAME: &'static str;

    fn id(&self) -> &str;
    fn meta(&self) -> &RecordMeta;
    fn meta_mut(&mut self) -> &mut RecordMeta;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Started,
    Finished,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ownership fields shared by every record that is also its own lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<i64>,
}

impl LockState {
    pub fn pending() -> Self {
        Self {
            status: Some(JobStatus::Pending),
            ..Default::default()
        }
    }

    pub fn started_by(owner: &str, now: i64) -> Self {
        Self {
            owner: Some(owner.to_string()),
            status: Some(JobStatus::Started),
            started: Some(now),
            finished: None,
        }
    }

    /// Marks the lock finished at `now`, never earlier than just after `started`.
    pub fn finish(&mut self, owner: &str, now: i64) {
        self.owner = Some(owner.to_string());
        self.status = Some(JobStatus::Finished);
        self.finished = Some(self.started.map_or(now, |started| now.max(started + 1)));
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some() || self.status == Some(JobStatus::Finished)
    }
}

pub trait Lockable: Record {
    fn lock(&self) -> &LockState;
    fn lock_mut(&mut self) -> &mut LockState;

    /// The record created when a claim targets an id with no row yet.
    fn lock_record(id: &str) -> Self;
}

macro_rules! impl_record {
    ($ty:ty, $type_name:literal, $id:ident) => {
        impl $crate::model::Record for $ty {
            const TYPE_NAME: &'static str = $type_name;

            fn id(&self) -> &str {
                &self.$id
            }

            fn meta(&self) -> &$crate::model::RecordMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut $crate::model::RecordMeta {
                &mut self.meta
            }
        }
    };
}

pub(crate) use impl_record;
