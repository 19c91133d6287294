//! Cache Facade
//!
//! The only entry point business code uses. Lookups go local tier first,
//! then the distributed tier; a distributed hit repopulates the local tier.
//!
//! The data path never fails: distributed-tier errors are logged and the
//! call degrades to local-only behaviour, unknown regions are logged and
//! treated as misses (without growing the statistics registry), and
//! undecodable entries are dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::clock::{system_clock, SharedClock};
use super::codec;
use super::distributed::DistributedTier;
use super::local::{LocalLookup, LocalPutOutcome, LocalRegion, LocalTier};
use super::region::{Region, RegionCatalog};
use super::stats::{GlobalStats, RegionStats, StatsRegistry};

/// Two-tier cache facade
#[derive(Debug)]
pub struct CacheFacade {
    catalog: Arc<RegionCatalog>,
    local: LocalTier,
    distributed: DistributedTier,
    stats: Arc<StatsRegistry>,
}

impl CacheFacade {
    /// Create a facade over both tiers
    pub fn new(
        catalog: Arc<RegionCatalog>,
        distributed: DistributedTier,
        stats: Arc<StatsRegistry>,
        clock: SharedClock,
    ) -> Self {
        let local = LocalTier::new(&catalog, clock);
        Self {
            catalog,
            local,
            distributed,
            stats,
        }
    }

    /// Facade over an in-memory distributed tier and the system clock
    pub fn in_memory(catalog: Arc<RegionCatalog>) -> Self {
        Self::new(
            catalog,
            DistributedTier::in_memory(),
            Arc::new(StatsRegistry::new()),
            system_clock(),
        )
    }

    pub fn catalog(&self) -> &Arc<RegionCatalog> {
        &self.catalog
    }

    pub fn stats_registry(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    pub fn distributed(&self) -> &DistributedTier {
        &self.distributed
    }

    fn resolve(&self, region: &str, operation: &'static str) -> Option<(&Region, &LocalRegion)> {
        match (self.catalog.get(region), self.local.region(region)) {
            (Some(r), Some(local)) => Some((r.as_ref(), local)),
            _ => {
                warn!(region, operation, "Cache operation on unknown region ignored");
                None
            }
        }
    }

    fn record_removals(&self, region: &str, outcome: &LocalPutOutcome) {
        self.stats.add_evictions(region, outcome.removals());
    }

    /// Look up a value, local tier first
    pub async fn get<T: DeserializeOwned>(&self, region: &str, key: &str) -> Option<T> {
        let Some((r, local)) = self.resolve(region, "get") else {
            return None;
        };

        match local.get(key) {
            LocalLookup::Hit(bytes) => match codec::decode::<T>(&bytes) {
                Ok(value) => {
                    self.stats.incr_hit(region);
                    debug!(region, key, "Local cache hit");
                    return Some(value);
                }
                Err(e) => {
                    warn!(region, key, error = %e, "Dropping undecodable local entry");
                    local.invalidate(key);
                }
            },
            LocalLookup::Expired => self.stats.incr_eviction(region),
            LocalLookup::Miss => {}
        }

        match self.distributed.get(r, key).await {
            Ok(Some(bytes)) => match codec::decode::<T>(&bytes) {
                Ok(value) => {
                    self.stats.incr_hit(region);
                    let outcome = local.put(key.to_string(), bytes);
                    self.record_removals(region, &outcome);
                    debug!(region, key, "Distributed cache hit, local tier repopulated");
                    return Some(value);
                }
                Err(e) => {
                    warn!(region, key, error = %e, "Dropping undecodable distributed entry");
                    if let Err(e) = self.distributed.delete(r, key).await {
                        warn!(region, key, operation = "delete", error = %e, "Distributed cache unavailable");
                    }
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(region, key, operation = "get", error = %e, "Distributed cache unavailable, serving local tier only");
            }
        }

        self.stats.incr_miss(region);
        debug!(region, key, "Cache miss");
        None
    }

    /// Store a value in both tiers.
    ///
    /// A value that serializes to `null` is never stored; the key is evicted
    /// instead.
    pub async fn put<T: Serialize + ?Sized>(&self, region: &str, key: &str, value: &T) {
        self.store(region, key, value, None).await;
    }

    /// Store a value whose distributed copy expires after `ttl` instead of
    /// the region's TTL. The local tier keeps its own expiry. A zero `ttl`
    /// evicts the key.
    pub async fn put_with_ttl<T: Serialize + ?Sized>(&self, region: &str, key: &str, value: &T, ttl: Duration) {
        if ttl.is_zero() {
            self.evict(region, key).await;
            return;
        }
        self.store(region, key, value, Some(ttl)).await;
    }

    /// Returns whether a value was written
    async fn store<T: Serialize + ?Sized>(
        &self,
        region: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let Some((r, local)) = self.resolve(region, "put") else {
            return false;
        };

        let bytes = match codec::encode(value) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(region, key, "Null value, evicting instead of caching");
                self.evict_from(r, local, key).await;
                return false;
            }
            Err(e) => {
                warn!(region, key, error = %e, "Value could not be serialized, not cached");
                return false;
            }
        };

        let outcome = local.put(key.to_string(), bytes.clone());
        self.record_removals(region, &outcome);

        let written = match ttl {
            Some(ttl) => self.distributed.put_with_ttl(r, key, bytes, ttl).await,
            None => self.distributed.put(r, key, bytes).await,
        };
        if let Err(e) = written {
            warn!(region, key, operation = "put", error = %e, "Distributed cache unavailable, value cached locally only");
        }

        self.stats.incr_put(region);
        true
    }

    async fn evict_from(&self, r: &Region, local: &LocalRegion, key: &str) {
        local.invalidate(key);
        if let Err(e) = self.distributed.delete(r, key).await {
            warn!(region = r.name(), key, operation = "delete", error = %e, "Distributed cache unavailable");
        }
    }

    /// Remove a key from both tiers
    pub async fn evict(&self, region: &str, key: &str) {
        if let Some((r, local)) = self.resolve(region, "evict") {
            self.evict_from(r, local, key).await;
        }
    }

    /// Remove several keys from both tiers
    pub async fn evict_many<I, S>(&self, region: &str, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some((r, local)) = self.resolve(region, "evict_many") {
            for key in keys {
                self.evict_from(r, local, key.as_ref()).await;
            }
        }
    }

    /// Remove every entry of a region from both tiers
    pub async fn clear(&self, region: &str) {
        let Some((r, local)) = self.resolve(region, "clear") else {
            return;
        };

        let removed = local.invalidate_all();
        match self.distributed.clear(r).await {
            Ok(remote) => debug!(region, local = removed, remote, "Region cleared"),
            Err(e) => {
                warn!(region, operation = "clear", error = %e, "Distributed cache unavailable, cleared local tier only")
            }
        }
    }

    /// Clear every region
    pub async fn clear_all(&self) {
        for name in self.catalog.names() {
            self.clear(name).await;
        }
    }

    /// Look up a value, computing and caching it on a miss.
    ///
    /// `Ok(None)` from `compute` is returned without caching; an error is
    /// returned to the caller untouched. Concurrent misses for the same key
    /// may each run `compute`.
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        region: &str,
        key: &str,
        compute: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(value) = self.get::<T>(region, key).await {
            return Ok(Some(value));
        }

        let computed = compute(key.to_string()).await?;
        if let Some(value) = &computed {
            self.store(region, key, value, None).await;
        }
        Ok(computed)
    }

    /// Give a distributed entry a new lifetime; returns whether it existed.
    ///
    /// A zero `ttl` removes the key from both tiers.
    pub async fn refresh_expire(&self, region: &str, key: &str, ttl: Duration) -> bool {
        let Some((r, local)) = self.resolve(region, "refresh_expire") else {
            return false;
        };
        if ttl.is_zero() {
            local.invalidate(key);
        }
        match self.distributed.expire(r, key, ttl).await {
            Ok(found) => found,
            Err(e) => {
                warn!(region, key, operation = "expire", error = %e, "Distributed cache unavailable");
                false
            }
        }
    }

    /// Remaining lifetime of a distributed entry
    pub async fn remaining_ttl(&self, region: &str, key: &str) -> Option<Duration> {
        let (r, _) = self.resolve(region, "remaining_ttl")?;
        match self.distributed.ttl(r, key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                warn!(region, key, operation = "ttl", error = %e, "Distributed cache unavailable");
                None
            }
        }
    }

    /// True if either tier holds the key. Does not touch statistics.
    pub async fn contains(&self, region: &str, key: &str) -> bool {
        let Some((r, local)) = self.resolve(region, "contains") else {
            return false;
        };
        if local.contains(key) {
            return true;
        }
        match self.distributed.get(r, key).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(region, key, operation = "contains", error = %e, "Distributed cache unavailable");
                false
            }
        }
    }

    /// Bulk-load entries; returns how many were written
    pub async fn warm<I, V>(&self, region: &str, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, V)>,
        V: Serialize,
    {
        if !self.catalog.contains(region) {
            warn!(region, operation = "warm", "Cache operation on unknown region ignored");
            return 0;
        }

        let mut written = 0;
        for (key, value) in entries {
            if self.store(region, &key, &value, None).await {
                written += 1;
            }
        }
        written
    }

    /// Drop expired local entries in every region; returns how many went
    pub fn purge_expired(&self) -> usize {
        let mut total = 0;
        for (region, removed) in self.local.purge_expired() {
            self.stats.add_evictions(&region, removed as u64);
            total += removed;
        }
        total
    }

    pub fn stats(&self, region: &str) -> RegionStats {
        self.stats.snapshot(region)
    }

    pub fn reset_stats(&self, region: &str) {
        self.stats.reset(region);
    }

    pub fn global_stats(&self) -> GlobalStats {
        self.stats.global()
    }

    /// Region names in configuration order
    pub fn regions(&self) -> &[String] {
        self.catalog.names()
    }

    /// Entries currently held by a region's local tier
    pub fn local_len(&self, region: &str) -> usize {
        self.local.region(region).map(LocalRegion::len).unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================
