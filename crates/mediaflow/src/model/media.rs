use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{impl_record, RecordMeta};

/// A media type: the file extensions it covers and its processing profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub name: String,
    /// Extensions without the leading dot.
    #[serde(default)]
    pub ext: Vec<String>,
    /// Parent media this one extends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, rename = "_meta")]
    pub meta: RecordMeta,
}

impl_record!(Media, "media", name);

/// One processing step applied to assets of a media type.
///
/// Fields left unset inherit from the profile named by `from`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_profiles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noop: Option<bool>,
    /// Output extension (no dot) that marks primary output files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    /// Regexes selecting extra output files to upload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_assets: Vec<String>,
    /// Analysis ordering; lower runs first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Operation parameters; keys set here override the parent's.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default, rename = "_meta")]
    pub meta: RecordMeta,
}

impl_record!(MediaProfile, "media_profile", name);

impl Media {
    pub fn new(name: &str, ext: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            ext: ext.iter().map(|e| e.trim_start_matches('.').to_string()).collect(),
            from: None,
            meta: RecordMeta::default(),
        }
    }
}

impl MediaProfile {
    pub fn new(name: &str, media: &str, operation: &str) -> Self {
        Self {
            name: name.to_string(),
            media: Some(media.to_string()),
            operation: Some(operation.to_string()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_new_strips_dots() {
        let media = Media::new("text", &[".txt", "md"]);
        assert_eq!(media.ext, vec!["txt", "md"]);
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let profile: MediaProfile =
            serde_json::from_str(r#"{"name":"upper","operation":"uppercase"}"#).unwrap();
        assert_eq!(profile.operation.as_deref(), Some("uppercase"));
        assert!(profile.sub_profiles.is_empty());
        assert!(profile.enabled.is_none());
        assert_eq!(profile.meta.version, 0);
    }
}
