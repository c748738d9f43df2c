use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use moka::sync::Cache;
use regex::Regex;
use tracing::debug;

use super::ResolvedProfile;
use crate::error::ProfileError;
use crate::model::MediaProfile;
use crate::repo::Repository;

const CACHE_CAPACITY: u64 = 10_000;

/// Resolves profiles from the repository and caches the results by name.
pub struct ProfileResolver {
    repo: Arc<dyn Repository<MediaProfile>>,
    cache: Cache<String, Arc<ResolvedProfile>>,
}

impl ProfileResolver {
    pub fn new(repo: Arc<dyn Repository<MediaProfile>>, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(CACHE_CAPACITY);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            repo,
            cache: builder.build(),
        }
    }

    pub async fn resolve(&self, name: &str) -> Result<Arc<ResolvedProfile>, ProfileError> {
        let mut visiting = Vec::new();
        self.resolve_inner(name, &mut visiting).await
    }

    /// Drops every cached resolution built from `name`.
    pub fn invalidate(&self, name: &str) {
        let stale: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(_, resolved)| resolved.depends_on.contains(name))
            .map(|(key, _)| key)
            .collect();
        for key in stale {
            self.cache.invalidate(key.as_str());
        }
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    fn resolve_inner<'a>(
        &'a self,
        name: &'a str,
        visiting: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<Arc<ResolvedProfile>, ProfileError>> {
        Box::pin(async move {
            if visiting.iter().any(|v| v == name) {
                let mut chain = visiting.clone();
                chain.push(name.to_string());
                return Err(ProfileError::Cycle { chain });
            }
            if let Some(cached) = self.cache.get(name) {
                return Ok(cached);
            }

            let profile = self
                .repo
                .safe_find_by_id(name)
                .await?
                .ok_or_else(|| ProfileError::NotFound(name.to_string()))?;

            visiting.push(name.to_string());
            let parent = match profile.from.as_deref() {
                Some(from) => Some(self.resolve_inner(from, visiting).await?),
                None => None,
            };
            let mut subs = Vec::with_capacity(profile.sub_profiles.len());
            for sub in &profile.sub_profiles {
                subs.push(self.resolve_inner(sub, visiting).await?);
            }
            visiting.pop();

            let resolved = Arc::new(merge(&profile, parent.as_deref(), subs)?);
            debug!(profile = %name, depends_on = ?resolved.depends_on, "resolved profile");
            self.cache.insert(name.to_string(), resolved.clone());
            Ok(resolved)
        })
    }
}

/// Child fields override the parent's; params merge key by key.
fn merge(
    profile: &MediaProfile,
    parent: Option<&ResolvedProfile>,
    subs: Vec<Arc<ResolvedProfile>>,
) -> Result<ResolvedProfile, ProfileError> {
    let additional_assets = if profile.additional_assets.is_empty() {
        parent
            .map(|p| p.additional_assets.clone())
            .unwrap_or_default()
    } else {
        profile
            .additional_assets
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ProfileError::InvalidPattern {
                    profile: profile.name.clone(),
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut params: BTreeMap<String, serde_json::Value> =
        parent.map(|p| p.params.clone()).unwrap_or_default();
    params.extend(profile.params.clone());

    let sub_profiles = if subs.is_empty() {
        parent.map(|p| p.sub_profiles.clone()).unwrap_or_default()
    } else {
        subs
    };

    let mut depends_on = BTreeSet::from([profile.name.clone()]);
    if let Some(p) = parent {
        depends_on.extend(p.depends_on.iter().cloned());
    }
    for sub in &sub_profiles {
        depends_on.extend(sub.depends_on.iter().cloned());
    }

    Ok(ResolvedProfile {
        name: profile.name.clone(),
        media: profile
            .media
            .clone()
            .or_else(|| parent.and_then(|p| p.media.clone())),
        operation: profile
            .operation
            .clone()
            .or_else(|| parent.and_then(|p| p.operation.clone())),
        enabled: profile
            .enabled
            .unwrap_or_else(|| parent.map_or(true, |p| p.enabled)),
        noop: profile
            .noop
            .unwrap_or_else(|| parent.map_or(false, |p| p.noop)),
        ext: profile
            .ext
            .clone()
            .or_else(|| parent.and_then(|p| p.ext.clone())),
        additional_assets,
        priority: profile
            .priority
            .unwrap_or_else(|| parent.map_or(0, |p| p.priority)),
        params,
        sub_profiles,
        depends_on,
    })
}
