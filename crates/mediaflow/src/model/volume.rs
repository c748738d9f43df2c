use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{impl_record, RecordMeta};

/// A storage volume holding original media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default, rename = "_meta")]
    pub meta: RecordMeta,
}

impl_record!(Source, "source", name);

/// A storage volume receiving transform outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Whether generated assets (transform and analysis outputs) are delivered here.
    #[serde(default)]
    pub assets: bool,
    #[serde(default, rename = "_meta")]
    pub meta: RecordMeta,
}

impl_record!(Destination, "destination", name);

impl Source {
    pub fn local(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: "local".to_string(),
            params: BTreeMap::from([("path".to_string(), path.to_string())]),
            meta: RecordMeta::default(),
        }
    }
}

impl Destination {
    pub fn local(name: &str, path: &str, assets: bool) -> Self {
        Self {
            name: name.to_string(),
            kind: "local".to_string(),
            params: BTreeMap::from([("path".to_string(), path.to_string())]),
            assets,
            meta: RecordMeta::default(),
        }
    }
}
