//! Local Tier - In-Process Region Cache
//!
//! One bounded LRU per region, each behind its own lock so regions never
//! contend with each other.
//!
//! # Design
//!
//! - Hard entry cap per region; the least recently used entry goes first
//! - Dual expiry: time since write and time since last read, whichever
//!   fires first
//! - Expired entries are dropped lazily on read, before a capacity eviction,
//!   and by [`LocalTier::purge_expired`]
//! - The tier never touches statistics itself; every removal it performs is
//!   reported back to the caller

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use super::clock::SharedClock;
use super::entry::LocalEntry;
use super::region::{RegionCatalog, RegionConfig};

/// Result of a local lookup
#[derive(Debug, Clone, PartialEq)]
pub enum LocalLookup {
    /// Entry present and fresh
    Hit(Bytes),
    /// No entry
    Miss,
    /// Entry was present but expired; it has been removed
    Expired,
}

/// What a local write displaced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalPutOutcome {
    /// Key evicted to make room, if any
    pub evicted: Option<String>,
    /// Expired entries dropped while making room
    pub expired: usize,
    /// An existing entry for the same key was overwritten
    pub replaced: bool,
}

impl LocalPutOutcome {
    /// Total entries removed by this write (overwrites excluded)
    pub fn removals(&self) -> u64 {
        self.expired as u64 + u64::from(self.evicted.is_some())
    }
}

/// Bounded LRU for a single region
pub struct LocalRegion {
    name: String,
    capacity: usize,
    expire_after_write: Duration,
    expire_after_access: Duration,
    entries: Mutex<LruCache<String, LocalEntry>>,
    clock: SharedClock,
}

impl LocalRegion {
    /// Create an empty region cache
    pub fn new(config: &RegionConfig, clock: SharedClock) -> Self {
        let capacity = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: config.name.clone(),
            capacity: capacity.get(),
            expire_after_write: config.expire_after_write,
            expire_after_access: config.expire_after_access,
            entries: Mutex::new(LruCache::new(capacity)),
            clock,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a key, refreshing its access time on hit
    pub fn get(&self, key: &str) -> LocalLookup {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let expired = match entries.peek(key) {
            Some(entry) => entry.is_expired(now, self.expire_after_write, self.expire_after_access),
            None => return LocalLookup::Miss,
        };

        if expired {
            entries.pop(key);
            return LocalLookup::Expired;
        }

        match entries.get_mut(key) {
            Some(entry) => {
                entry.touch(now);
                LocalLookup::Hit(entry.value().clone())
            }
            None => LocalLookup::Miss,
        }
    }

    /// Insert or overwrite an entry
    pub fn put(&self, key: String, value: Bytes) -> LocalPutOutcome {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let mut outcome = LocalPutOutcome::default();

        // Prefer dropping dead entries over evicting a live one. Only the LRU
        // tail is examined; bulk expiry is left to the sweeper.
        if entries.len() >= self.capacity && !entries.contains(key.as_str()) {
            outcome.expired = self.pop_expired_tail(&mut entries, now);
        }

        match entries.push(key.clone(), LocalEntry::new(value, now)) {
            Some((old_key, _)) if old_key == key => outcome.replaced = true,
            Some((old_key, _)) => outcome.evicted = Some(old_key),
            None => {}
        }

        outcome
    }

    /// Remove one entry; returns whether it existed
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Remove every entry; returns how many were removed
    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    /// True if a fresh entry exists (does not refresh access time)
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .lock()
            .peek(key)
            .map(|e| !e.is_expired(now, self.expire_after_write, self.expire_after_access))
            .unwrap_or(false)
    }

    /// Drop all expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        self.drain_expired(&mut entries)
    }

    fn pop_expired_tail(&self, entries: &mut LruCache<String, LocalEntry>, now: Instant) -> usize {
        let mut popped = 0;
        while entries
            .peek_lru()
            .is_some_and(|(_, e)| e.is_expired(now, self.expire_after_write, self.expire_after_access))
        {
            entries.pop_lru();
            popped += 1;
        }
        popped
    }

    fn drain_expired(&self, entries: &mut LruCache<String, LocalEntry>) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now, self.expire_after_write, self.expire_after_access))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            entries.pop(key.as_str());
        }
        expired.len()
    }

    /// Number of entries currently held (expired-but-unswept included)
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }
}

impl std::fmt::Debug for LocalRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRegion")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

/// Process-local tier: one [`LocalRegion`] per catalogue region
#[derive(Debug)]
pub struct LocalTier {
    regions: HashMap<String, LocalRegion>,
}

impl LocalTier {
    /// Create a local region for every catalogue entry
    pub fn new(catalog: &RegionCatalog, clock: SharedClock) -> Self {
        let regions = catalog
            .iter()
            .map(|region| {
                (
                    region.name().to_string(),
                    LocalRegion::new(region.config(), clock.clone()),
                )
            })
            .collect();
        Self { regions }
    }

    pub fn region(&self, name: &str) -> Option<&LocalRegion> {
        self.regions.get(name)
    }

    /// Purge expired entries in every region; returns per-region counts
    pub fn purge_expired(&self) -> Vec<(String, usize)> {
        self.regions
            .iter()
            .map(|(name, region)| (name.clone(), region.purge_expired()))
            .collect()
    }

    /// Total entries across regions
    pub fn len(&self) -> usize {
        self.regions.values().map(LocalRegion::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
