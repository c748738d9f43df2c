use serde::{Deserialize, Serialize};

use super::{asset::asset_source, impl_record, LockState, Lockable, RecordMeta};

/// The run of one profile against one asset. Also the lock for that run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileJob {
    pub name: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default)]
    pub analysis: bool,
    #[serde(default)]
    pub asset: String,
    #[serde(flatten)]
    pub lock: LockState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, rename = "_meta")]
    pub meta: RecordMeta,
}

impl_record!(ProfileJob, "profile_job", name);

impl Lockable for ProfileJob {
    fn lock(&self) -> &LockState {
        &self.lock
    }

    fn lock_mut(&mut self) -> &mut LockState {
        &mut self.lock
    }

    fn lock_record(id: &str) -> Self {
        Self {
            name: id.to_string(),
            profile: String::new(),
            operation: None,
            analysis: false,
            asset: String::new(),
            lock: LockState::default(),
            result: None,
            meta: RecordMeta::default(),
        }
    }
}

/// A pending transfer of one output file to one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadJob {
    pub name: String,
    #[serde(default)]
    pub local_path: String,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub media: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub size: u64,
    #[serde(flatten)]
    pub lock: LockState,
    #[serde(default, rename = "_meta")]
    pub meta: RecordMeta,
}

impl_record!(UploadJob, "upload_job", name);

impl UploadJob {
    pub fn source(&self) -> &str {
        asset_source(&self.asset)
    }
}

impl Lockable for UploadJob {
    fn lock(&self) -> &LockState {
        &self.lock
    }

    fn lock_mut(&mut self) -> &mut LockState {
        &mut self.lock
    }

    fn lock_record(id: &str) -> Self {
        Self {
            name: id.to_string(),
            local_path: String::new(),
            asset: String::new(),
            media: String::new(),
            profile: String::new(),
            destination: String::new(),
            size: 0,
            lock: LockState::default(),
            meta: RecordMeta::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;

    #[test]
    fn test_profile_job_flattens_lock() {
        let mut job = ProfileJob::lock_record("p~s~a.txt~abc");
        job.lock = LockState::started_by("w1", 5);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "started");
        assert_eq!(json["owner"], "w1");
        assert_eq!(json["started"], 5);
        assert_eq!(json["analysis"], false);

        let back: ProfileJob = serde_json::from_value(json).unwrap();
        assert_eq!(back.lock.status, Some(JobStatus::Started));
    }

    #[test]
    fn test_upload_job_source() {
        let mut job = UploadJob::lock_record("u1");
        job.asset = "src>dir/a.txt".into();
        assert_eq!(job.source(), "src");
    }
}
