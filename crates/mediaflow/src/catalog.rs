//! Writing the configured catalog into the repository at startup.

use tracing::info;

use crate::config::Catalog;
use crate::error::Result;
use crate::model::{LocalConfig, Record};
use crate::repo::{upsert, Repository, RepositorySet};

/// Counts of records written by [`seed_catalog`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub sources: usize,
    pub destinations: usize,
    pub media: usize,
    pub profiles: usize,
    pub libraries: usize,
    pub local_config: bool,
}

/// Creates or replaces every catalog record. Records absent from the catalog
/// are left alone.
pub async fn seed_catalog(repos: &RepositorySet, catalog: &Catalog) -> Result<SeedSummary> {
    let summary = SeedSummary {
        sources: seed_all(repos.sources.as_ref(), &catalog.sources).await?,
        destinations: seed_all(repos.destinations.as_ref(), &catalog.destinations).await?,
        media: seed_all(repos.media.as_ref(), &catalog.media).await?,
        profiles: seed_all(repos.profiles.as_ref(), &catalog.profiles).await?,
        libraries: seed_all(repos.libraries.as_ref(), &catalog.libraries).await?,
        local_config: match &catalog.local {
            Some(local) => {
                let local = LocalConfig {
                    id: LocalConfig::ID.to_string(),
                    ..local.clone()
                };
                upsert(repos.local_config.as_ref(), local).await?;
                true
            }
            None => false,
        },
    };
    info!(?summary, "seeded catalog");
    Ok(summary)
}

async fn seed_all<T: Record>(repo: &dyn Repository<T>, records: &[T]) -> Result<usize> {
    for record in records {
        upsert(repo, record.clone()).await?;
    }
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::{SharedClock, SystemClock};
    use crate::model::{Destination, Library, Media, MediaProfile, Source};

    fn catalog() -> Catalog {
        Catalog {
            sources: vec![Source::local("inbox", "/data/inbox")],
            destinations: vec![Destination::local("archive", "/data/archive", true)],
            media: vec![Media::new("text", &["txt"])],
            profiles: vec![MediaProfile::new("wordCounter", "text", "wordCount")],
            libraries: vec![Library::new("docs", "text", &["inbox"])],
            local: Some(LocalConfig {
                id: "ignored".into(),
                autoscan_enabled: true,
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_seed_is_repeatable() {
        let clock: SharedClock = Arc::new(SystemClock);
        let repos = RepositorySet::in_memory(clock);

        let first = seed_catalog(&repos, &catalog()).await.unwrap();
        assert_eq!(first.profiles, 1);
        assert!(first.local_config);

        let mut changed = catalog();
        changed.media[0].ext.push("md".into());
        seed_catalog(&repos, &changed).await.unwrap();

        let media = repos.media.find_by_id("text").await.unwrap();
        assert_eq!(media.ext, vec!["txt", "md"]);
        assert_eq!(media.meta.version, 2);
        assert_eq!(repos.sources.find_all().await.unwrap().len(), 1);

        let local = repos.local_config.find_by_id(LocalConfig::ID).await.unwrap();
        assert!(local.autoscan_enabled);
    }

    #[tokio::test]
    async fn test_apply_catalog_refreshes_cached_profiles() {
        use crate::profile::OperationRegistry;
        use crate::stage::StageContext;

        let clock: SharedClock = Arc::new(SystemClock);
        let repos = RepositorySet::in_memory(clock.clone());
        let ctx = StageContext::new(Default::default(), repos, clock, OperationRegistry::new());

        let mut child = MediaProfile::new("small", "text", "wordCount");
        child.from = Some("wordCounter".into());
        let mut catalog = catalog();
        catalog.profiles.push(child);
        ctx.apply_catalog(&catalog).await.unwrap();
        assert_eq!(ctx.profiles.resolve("small").await.unwrap().priority, 0);

        // Changing the parent must reach the cached child resolution too.
        catalog.profiles[0].priority = Some(7);
        ctx.apply_catalog(&catalog).await.unwrap();
        assert_eq!(ctx.profiles.resolve("small").await.unwrap().priority, 7);
    }
}
