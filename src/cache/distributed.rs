//! Distributed Tier - Shared Cache Backend
//!
//! Cache shared by every process, keyed by `{prefix}{region}:{key}` and
//! written with the region's current TTL.
//!
//! # Design
//!
//! - Pluggable backend behind [`DistributedBackend`]
//! - TTL is read from the region at write time, so an adapted TTL only
//!   applies to entries written after the change
//! - Every failure surfaces as an [`Error`]; the facade decides to fail open

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::clock::{system_clock, SharedClock};
use super::region::Region;
use crate::error::{Error, Result};

/// Default prefix for every stored key
pub const DEFAULT_KEY_PREFIX: &str = "cache:";

/// Distributed storage backend trait
#[async_trait]
pub trait DistributedBackend: Send + Sync + std::fmt::Debug {
    /// Short backend name used in logs and errors
    fn name(&self) -> &'static str;

    /// Get a value
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Set a value that expires after `ttl`
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete a value; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key starting with `prefix`; returns how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Give a live key a new lifetime; returns whether it existed.
    ///
    /// A zero `ttl` deletes the key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining lifetime of a live key
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Reclaim expired keys; returns how many were dropped.
    ///
    /// Backends that expire keys on their own have nothing to do here.
    async fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }

    /// Check the backend is reachable
    async fn ping(&self) -> Result<()>;

    /// Operation counters
    fn stats(&self) -> BackendStats;
}

/// Backend operation counters
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BackendStats {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct BackendCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl BackendCounters {
    pub(crate) fn read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BackendStats {
        BackendStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    expires_at: Instant,
}

/// In-process backend with real TTL semantics.
///
/// Used when no external cache is configured and in tests. The availability
/// switch makes every operation fail, which is how an unreachable backend is
/// simulated.
#[derive(Debug)]
pub struct InMemoryBackend {
    entries: DashMap<String, StoredValue>,
    clock: SharedClock,
    available: AtomicBool,
    counters: BackendCounters,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(system_clock())
    }
}

impl InMemoryBackend {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
            counters: BackendCounters::default(),
        }
    }

    /// Make every subsequent operation succeed or fail
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            self.counters.error();
            Err(Error::backend("memory", operation, "backend unavailable"))
        }
    }

    /// Remaining lifetime of a live key
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .and_then(|e| e.expires_at.checked_duration_since(now))
            .filter(|d| !d.is_zero())
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored keys, expired-but-unpurged included
    pub fn stored_len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl DistributedBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check("get")?;
        self.counters.read();

        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(stored) if stored.expires_at > now => return Ok(Some(stored.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, v| v.expires_at <= now);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.check("set")?;
        self.counters.write();

        let expires_at = self.clock.now() + ttl;
        self.entries
            .insert(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check("delete")?;
        self.counters.delete();

        let now = self.clock.now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, v)| v.expires_at > now)
            .unwrap_or(false))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.check("delete_prefix")?;
        self.counters.delete();

        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check("expire")?;
        self.counters.write();

        let now = self.clock.now();
        if ttl.is_zero() {
            return Ok(self.entries.remove_if(key, |_, v| v.expires_at > now).is_some());
        }

        Ok(match self.entries.get_mut(key) {
            Some(mut stored) if stored.expires_at > now => {
                stored.expires_at = now + ttl;
                true
            }
            _ => false,
        })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check("ttl")?;
        self.counters.read();
        Ok(self.ttl_remaining(key))
    }

    async fn purge_expired(&self) -> Result<u64> {
        self.check("purge_expired")?;

        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, v| v.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        self.check("ping")
    }

    fn stats(&self) -> BackendStats {
        self.counters.snapshot()
    }
}

/// Shared tier addressed by region and key
#[derive(Debug, Clone)]
pub struct DistributedTier {
    backend: Arc<dyn DistributedBackend>,
    key_prefix: String,
}

impl DistributedTier {
    pub fn new(backend: Arc<dyn DistributedBackend>, key_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
        }
    }

    /// Tier over a fresh in-memory backend
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::default()), DEFAULT_KEY_PREFIX)
    }

    pub fn backend(&self) -> &Arc<dyn DistributedBackend> {
        &self.backend
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Stored key for a region entry
    pub fn key(&self, region: &str, key: &str) -> String {
        format!("{}{}:{}", self.key_prefix, region, key)
    }

    /// Prefix covering every entry of a region
    pub fn region_prefix(&self, region: &str) -> String {
        format!("{}{}:", self.key_prefix, region)
    }

    pub async fn get(&self, region: &Region, key: &str) -> Result<Option<Bytes>> {
        self.backend.get(&self.key(region.name(), key)).await
    }

    /// Write with the region's TTL as of now
    pub async fn put(&self, region: &Region, key: &str, value: Bytes) -> Result<()> {
        self.put_with_ttl(region, key, value, region.ttl()).await
    }

    /// Write with an explicit TTL, bypassing the region's adaptive one
    pub async fn put_with_ttl(&self, region: &Region, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.backend
            .set(&self.key(region.name(), key), value, ttl)
            .await
    }

    pub async fn expire(&self, region: &Region, key: &str, ttl: Duration) -> Result<bool> {
        self.backend.expire(&self.key(region.name(), key), ttl).await
    }

    pub async fn ttl(&self, region: &Region, key: &str) -> Result<Option<Duration>> {
        self.backend.ttl(&self.key(region.name(), key)).await
    }

    /// Reclaim expired keys across every region
    pub async fn purge_expired(&self) -> Result<u64> {
        self.backend.purge_expired().await
    }

    pub async fn delete(&self, region: &Region, key: &str) -> Result<bool> {
        self.backend.delete(&self.key(region.name(), key)).await
    }

    pub async fn clear(&self, region: &Region) -> Result<u64> {
        self.backend
            .delete_prefix(&self.region_prefix(region.name()))
            .await
    }

    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::region::{RegionCatalog, RegionConfig};

    fn catalog() -> RegionCatalog {
        RegionCatalog::new(vec![
            RegionConfig::new("users")
                .with_ttl(Duration::from_secs(900))
                .with_ttl_bounds(Duration::from_secs(300), Duration::from_secs(3600)),
            RegionConfig::new("roles"),
        ])
        .unwrap()
    }

    fn tier_with_clock() -> (DistributedTier, Arc<InMemoryBackend>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let backend = Arc::new(InMemoryBackend::new(clock.clone()));
        let tier = DistributedTier::new(backend.clone(), DEFAULT_KEY_PREFIX);
        (tier, backend, clock)
    }

    #[test]
    fn test_key_format() {
        let tier = DistributedTier::new(Arc::new(InMemoryBackend::default()), "archive:cache:");
        assert_eq!(tier.key("users", "42"), "archive:cache:users:42");
        assert_eq!(tier.region_prefix("users"), "archive:cache:users:");

        let tier = DistributedTier::in_memory();
        assert_eq!(tier.key("roles", "admin"), "cache:roles:admin");
        assert_eq!(tier.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let catalog = catalog();
        let users = catalog.get("users").unwrap();
        let (tier, backend, _) = tier_with_clock();

        tier.put(users, "u1", Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(
            tier.get(users, "u1").await.unwrap(),
            Some(Bytes::from_static(b"1"))
        );
        assert_eq!(tier.get(users, "u2").await.unwrap(), None);

        assert!(tier.delete(users, "u1").await.unwrap());
        assert!(!tier.delete(users, "u1").await.unwrap());
        assert_eq!(tier.get(users, "u1").await.unwrap(), None);

        let stats = backend.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 3);
        assert_eq!(stats.deletes, 2);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let catalog = catalog();
        let users = catalog.get("users").unwrap();
        let (tier, _, clock) = tier_with_clock();

        tier.put(users, "u1", Bytes::from_static(b"1")).await.unwrap();

        clock.advance(Duration::from_secs(899));
        assert!(tier.get(users, "u1").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(tier.get(users, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_read_at_write_time() {
        let catalog = catalog();
        let users = catalog.get("users").unwrap();
        let (tier, backend, _) = tier_with_clock();

        tier.put(users, "old", Bytes::from_static(b"1")).await.unwrap();
        users.set_ttl(Duration::from_secs(1800));
        tier.put(users, "new", Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(
            backend.ttl_remaining("cache:users:old"),
            Some(Duration::from_secs(900))
        );
        assert_eq!(
            backend.ttl_remaining("cache:users:new"),
            Some(Duration::from_secs(1800))
        );
    }

    #[tokio::test]
    async fn test_clear_only_touches_region() {
        let catalog = catalog();
        let users = catalog.get("users").unwrap();
        let roles = catalog.get("roles").unwrap();
        let tier = DistributedTier::in_memory();

        for i in 0..3 {
            tier.put(users, &i.to_string(), Bytes::from_static(b"u")).await.unwrap();
        }
        tier.put(roles, "admin", Bytes::from_static(b"r")).await.unwrap();

        assert_eq!(tier.clear(users).await.unwrap(), 3);
        assert!(tier.get(users, "0").await.unwrap().is_none());
        assert!(tier.get(roles, "admin").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_reclaims_unread_expired_keys() {
        let catalog = catalog();
        let users = catalog.get("users").unwrap();
        let (tier, backend, clock) = tier_with_clock();

        for i in 0..1000 {
            tier.put(users, &i.to_string(), Bytes::from_static(b"u")).await.unwrap();
        }
        clock.advance(Duration::from_secs(600));
        tier.put(users, "late", Bytes::from_static(b"u")).await.unwrap();
        clock.advance(Duration::from_secs(301));

        // Never read again, so nothing reclaimed them yet
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.stored_len(), 1001);

        assert_eq!(tier.purge_expired().await.unwrap(), 1000);
        assert_eq!(backend.stored_len(), 1);
        assert!(tier.get(users, "late").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expire_and_ttl() {
        let catalog = catalog();
        let users = catalog.get("users").unwrap();
        let (tier, _, clock) = tier_with_clock();

        tier.put_with_ttl(users, "u1", Bytes::from_static(b"1"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(tier.ttl(users, "u1").await.unwrap(), Some(Duration::from_secs(60)));

        clock.advance(Duration::from_secs(50));
        assert!(tier.expire(users, "u1", Duration::from_secs(120)).await.unwrap());
        clock.advance(Duration::from_secs(100));
        assert_eq!(tier.ttl(users, "u1").await.unwrap(), Some(Duration::from_secs(20)));

        clock.advance(Duration::from_secs(20));
        assert_eq!(tier.ttl(users, "u1").await.unwrap(), None);
        assert!(!tier.expire(users, "u1", Duration::from_secs(60)).await.unwrap());
        assert!(!tier.expire(users, "missing", Duration::from_secs(60)).await.unwrap());

        tier.put(users, "u2", Bytes::from_static(b"2")).await.unwrap();
        assert!(tier.expire(users, "u2", Duration::ZERO).await.unwrap());
        assert!(tier.get(users, "u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let catalog = catalog();
        let users = catalog.get("users").unwrap();
        let (tier, backend, _) = tier_with_clock();

        backend.set_available(false);
        let err = tier.get(users, "u1").await.unwrap_err();
        assert!(err.is_backend());
        assert!(tier.put(users, "u1", Bytes::new()).await.is_err());
        assert!(tier.ping().await.is_err());
        assert_eq!(backend.stats().errors, 3);

        backend.set_available(true);
        assert!(tier.ping().await.is_ok());
    }
}
