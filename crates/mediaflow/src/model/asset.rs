use serde::{Deserialize, Serialize};

use super::{impl_record, LockState, Lockable, RecordMeta};

/// Separates the source name from the relative path in an asset name.
pub const ASSET_SEP: &str = ">";

/// One discovered file, keyed by `source>relative/path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAsset {
    pub name: String,
    pub source: String,
    #[serde(flatten)]
    pub lock: LockState,
    #[serde(default, rename = "_meta")]
    pub meta: RecordMeta,
}

impl_record!(SourceAsset, "source_asset", name);

impl SourceAsset {
    pub fn discovered(source: &str, path: &str, owner: &str) -> Self {
        Self {
            name: asset_name(source, path),
            source: source.to_string(),
            lock: LockState {
                owner: Some(owner.to_string()),
                ..LockState::pending()
            },
            meta: RecordMeta::default(),
        }
    }
}

impl Lockable for SourceAsset {
    fn lock(&self) -> &LockState {
        &self.lock
    }

    fn lock_mut(&mut self) -> &mut LockState {
        &mut self.lock
    }

    fn lock_record(id: &str) -> Self {
        Self {
            name: id.to_string(),
            source: asset_source(id).to_string(),
            lock: LockState::default(),
            meta: RecordMeta::default(),
        }
    }
}

pub fn asset_name(source: &str, path: &str) -> String {
    format!("{}{}{}", source, ASSET_SEP, path.trim_start_matches('/'))
}

/// The source part of an asset name; the whole name if it has no separator.
pub fn asset_source(name: &str) -> &str {
    name.split_once(ASSET_SEP).map(|(s, _)| s).unwrap_or(name)
}

/// The path part of an asset name, relative to its source root.
pub fn asset_path(name: &str) -> &str {
    name.split_once(ASSET_SEP).map(|(_, p)| p).unwrap_or(name)
}

pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Extension including the dot, or empty when there is none.
pub fn file_ext_with_dot(path: &str) -> &str {
    let name = basename(path);
    match name.rfind('.') {
        Some(pos) if pos + 1 < name.len() => &name[pos..],
        _ => "",
    }
}

pub fn file_ext_without_dot(path: &str) -> &str {
    file_ext_with_dot(path).trim_start_matches('.')
}
