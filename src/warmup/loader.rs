//! Warm-up data sources.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

/// Entries produced by a loader, keyed by cache key
pub type LoadedEntries = HashMap<String, Value>;

/// Source of warm-up data for one or more regions
#[async_trait]
pub trait RegionLoader: Send + Sync {
    /// Load everything worth caching for `region`
    async fn load(&self, region: &str) -> anyhow::Result<LoadedEntries>;

    /// Load at most `limit` entries.
    ///
    /// The default loads everything and keeps the `limit` greatest keys.
    /// Loaders that know which entries are hot should override this.
    async fn load_top(&self, region: &str, limit: usize) -> anyhow::Result<LoadedEntries> {
        let entries = self.load(region).await?;
        Ok(keep_greatest_keys(entries, limit))
    }
}

fn keep_greatest_keys(entries: LoadedEntries, limit: usize) -> LoadedEntries {
    if entries.len() <= limit {
        return entries;
    }
    let mut sorted: Vec<(String, Value)> = entries.into_iter().collect();
    sorted.sort_by(|a, b| b.0.cmp(&a.0));
    sorted.truncate(limit);
    sorted.into_iter().collect()
}

/// Loader backed by an async closure
pub struct FnLoader<F> {
    f: F,
}

impl<F, Fut> FnLoader<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<LoadedEntries>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> RegionLoader for FnLoader<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<LoadedEntries>> + Send,
{
    async fn load(&self, region: &str) -> anyhow::Result<LoadedEntries> {
        (self.f)(region.to_string()).await
    }
}

/// Loader serving fixed entries, e.g. seed data from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    regions: HashMap<String, LoadedEntries>,
}

impl StaticLoader {
    pub fn new(regions: HashMap<String, LoadedEntries>) -> Self {
        Self { regions }
    }

    /// Regions this loader has data for
    pub fn regions(&self) -> impl Iterator<Item = &String> {
        self.regions.keys()
    }
}

#[async_trait]
impl RegionLoader for StaticLoader {
    async fn load(&self, region: &str) -> anyhow::Result<LoadedEntries> {
        Ok(self.regions.get(region).cloned().unwrap_or_default())
    }
}
