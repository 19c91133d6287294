//! Cache regions and the fixed region catalogue.
//!
//! A region is a named namespace with its own local-tier sizing, local expiry
//! and distributed TTL. The catalogue is built once at startup; only the
//! distributed TTL changes afterwards, and always within `[min_ttl, max_ttl]`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default local-tier capacity (entries)
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Default local expire-after-write
pub const DEFAULT_EXPIRE_AFTER_WRITE: Duration = Duration::from_secs(30 * 60);

/// Default local expire-after-access
pub const DEFAULT_EXPIRE_AFTER_ACCESS: Duration = Duration::from_secs(10 * 60);

/// Default distributed TTL
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Lowest TTL the adaptive engine may shrink a region to
pub const DEFAULT_MIN_TTL: Duration = Duration::from_secs(300);

/// Highest TTL the adaptive engine may grow a region to
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(24 * 3600);

/// Local-tier eviction policy tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used
    #[default]
    Lru,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "LRU"),
        }
    }
}

/// Static configuration of one region
#[derive(Debug, Clone, PartialEq)]
pub struct RegionConfig {
    /// Unique region name
    pub name: String,
    /// Local-tier capacity in entries
    pub max_size: usize,
    /// Local entry lifetime measured from insertion
    pub expire_after_write: Duration,
    /// Local entry lifetime measured from last read
    pub expire_after_access: Duration,
    /// Initial distributed TTL
    pub ttl: Duration,
    /// Lower TTL bound for adaptation
    pub min_ttl: Duration,
    /// Upper TTL bound for adaptation
    pub max_ttl: Duration,
    /// Whether warm-up may populate this region
    pub warmup_enabled: bool,
    /// Local eviction policy
    pub eviction_policy: EvictionPolicy,
}

impl RegionConfig {
    /// Region with default sizing and TTLs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_size: DEFAULT_MAX_SIZE,
            expire_after_write: DEFAULT_EXPIRE_AFTER_WRITE,
            expire_after_access: DEFAULT_EXPIRE_AFTER_ACCESS,
            ttl: DEFAULT_TTL,
            min_ttl: DEFAULT_MIN_TTL,
            max_ttl: DEFAULT_MAX_TTL,
            warmup_enabled: false,
            eviction_policy: EvictionPolicy::Lru,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_local_expiry(mut self, after_write: Duration, after_access: Duration) -> Self {
        self.expire_after_write = after_write;
        self.expire_after_access = after_access;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_ttl_bounds(mut self, min_ttl: Duration, max_ttl: Duration) -> Self {
        self.min_ttl = min_ttl;
        self.max_ttl = max_ttl;
        self
    }

    pub fn with_warmup(mut self, enabled: bool) -> Self {
        self.warmup_enabled = enabled;
        self
    }

    /// Check the region invariants
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("region name must not be empty".into()));
        }
        if self.max_size == 0 {
            return Err(Error::Config(format!(
                "region {}: max_size must be positive",
                self.name
            )));
        }
        if self.expire_after_write.is_zero() || self.expire_after_access.is_zero() {
            return Err(Error::Config(format!(
                "region {}: local expiry must be positive",
                self.name
            )));
        }
        if self.min_ttl.is_zero() {
            return Err(Error::Config(format!(
                "region {}: min_ttl must be positive",
                self.name
            )));
        }
        if self.min_ttl > self.max_ttl {
            return Err(Error::Config(format!(
                "region {}: min_ttl {:?} exceeds max_ttl {:?}",
                self.name, self.min_ttl, self.max_ttl
            )));
        }
        if self.ttl < self.min_ttl || self.ttl > self.max_ttl {
            return Err(Error::Config(format!(
                "region {}: ttl {:?} outside [{:?}, {:?}]",
                self.name, self.ttl, self.min_ttl, self.max_ttl
            )));
        }
        Ok(())
    }
}

/// Runtime view of a region: static config plus the live distributed TTL
#[derive(Debug)]
pub struct Region {
    config: RegionConfig,
    ttl_millis: AtomicU64,
}

impl Region {
    fn new(config: RegionConfig) -> Self {
        let ttl_millis = AtomicU64::new(config.ttl.as_millis() as u64);
        Self { config, ttl_millis }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[inline]
    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Current distributed TTL
    #[inline]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_millis.load(Ordering::Acquire))
    }

    /// Replace the distributed TTL, clamped into the region's bounds.
    ///
    /// Returns the TTL actually stored.
    pub fn set_ttl(&self, ttl: Duration) -> Duration {
        let clamped = ttl.clamp(self.config.min_ttl, self.config.max_ttl);
        self.ttl_millis
            .store(clamped.as_millis() as u64, Ordering::Release);
        clamped
    }

    #[inline]
    pub fn min_ttl(&self) -> Duration {
        self.config.min_ttl
    }

    #[inline]
    pub fn max_ttl(&self) -> Duration {
        self.config.max_ttl
    }

    #[inline]
    pub fn warmup_enabled(&self) -> bool {
        self.config.warmup_enabled
    }
}

/// Fixed set of regions, shared by both tiers and the background loops
#[derive(Debug, Default)]
pub struct RegionCatalog {
    regions: HashMap<String, Arc<Region>>,
    order: Vec<String>,
}

impl RegionCatalog {
    /// Build a catalogue, rejecting invalid or duplicate regions
    pub fn new(configs: impl IntoIterator<Item = RegionConfig>) -> Result<Self> {
        let mut catalog = Self::default();

        for config in configs {
            config.validate()?;
            if catalog.contains(&config.name) {
                return Err(Error::Config(format!(
                    "duplicate region name: {}",
                    config.name
                )));
            }
            catalog.insert(config);
        }

        Ok(catalog)
    }

    /// Catalogue used when no configuration file is supplied
    pub fn reference() -> Self {
        let mut catalog = Self::default();
        for config in reference_regions() {
            catalog.insert(config);
        }
        catalog
    }

    fn insert(&mut self, config: RegionConfig) {
        self.order.push(config.name.clone());
        self.regions
            .insert(config.name.clone(), Arc::new(Region::new(config)));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Region>> {
        self.regions.get(name)
    }

    /// Look up a region, failing for names outside the catalogue
    pub fn require(&self, name: &str) -> Result<&Arc<Region>> {
        self.get(name)
            .ok_or_else(|| Error::UnknownRegion(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.regions.contains_key(name)
    }

    /// Region names in configuration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Regions in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Region>> {
        self.order.iter().filter_map(|name| self.regions.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The reference region set
pub fn reference_regions() -> Vec<RegionConfig> {
    const MIN: u64 = 60;
    const HOUR: u64 = 3600;
    let secs = Duration::from_secs;

    vec![
        RegionConfig::new("users")
            .with_max_size(1000)
            .with_ttl(secs(15 * MIN))
            .with_ttl_bounds(secs(5 * MIN), secs(4 * HOUR))
            .with_warmup(true),
        RegionConfig::new("permissions")
            .with_max_size(200)
            .with_ttl(secs(HOUR))
            .with_ttl_bounds(secs(5 * MIN), secs(8 * HOUR))
            .with_warmup(true),
        RegionConfig::new("roles")
            .with_max_size(50)
            .with_ttl(secs(30 * MIN))
            .with_ttl_bounds(secs(5 * MIN), secs(8 * HOUR))
            .with_warmup(true),
        RegionConfig::new("departments")
            .with_max_size(100)
            .with_ttl(secs(HOUR))
            .with_ttl_bounds(secs(5 * MIN), secs(8 * HOUR))
            .with_warmup(true),
        RegionConfig::new("archives")
            .with_max_size(2000)
            .with_ttl(secs(30 * MIN))
            .with_ttl_bounds(secs(5 * MIN), secs(4 * HOUR))
            .with_warmup(true),
        RegionConfig::new("config")
            .with_max_size(500)
            .with_local_expiry(secs(4 * HOUR), secs(HOUR))
            .with_ttl(secs(4 * HOUR))
            .with_ttl_bounds(secs(5 * MIN), secs(24 * HOUR))
            .with_warmup(true),
        RegionConfig::new("statistics")
            .with_max_size(100)
            .with_local_expiry(secs(5 * MIN), secs(5 * MIN))
            .with_ttl(secs(15 * MIN))
            .with_ttl_bounds(secs(5 * MIN), secs(HOUR))
            .with_warmup(true),
    ]
}

// =============================================================================
// Tests
// =============================================================================
