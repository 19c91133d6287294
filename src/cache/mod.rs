//! Two-Tier Cache
//!
//! Process-local LRU regions in front of a shared distributed cache.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         CacheFacade                           │
//! │        get / put / evict / clear / get_or_compute             │
//! ├──────────────────────────────┬───────────────────────────────┤
//! │  LocalTier (per region)      │  DistributedTier              │
//! │  ┌────────────────────────┐  │  ┌─────────────────────────┐  │
//! │  │ Mutex<LruCache>        │  │  │ DistributedBackend      │  │
//! │  │ max_size, dual expiry  │  │  │ memory | redis          │  │
//! │  └────────────────────────┘  │  │ key = prefix+region:key │  │
//! │                              │  │ TTL = region.ttl()      │  │
//! │                              │  └─────────────────────────┘  │
//! ├──────────────────────────────┴───────────────────────────────┤
//! │              StatsRegistry (atomic, per region)               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads fall back local → distributed; a distributed hit repopulates the
//! local tier. Writes go to both tiers. Distributed failures never reach the
//! caller.

pub mod clock;
pub mod codec;
pub mod distributed;
mod entry;
pub mod facade;
pub mod local;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod region;
pub mod stats;
pub mod sweeper;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use distributed::{
    BackendStats, DistributedBackend, DistributedTier, InMemoryBackend, DEFAULT_KEY_PREFIX,
};
pub use entry::LocalEntry;
pub use facade::CacheFacade;
pub use local::{LocalLookup, LocalPutOutcome, LocalRegion, LocalTier};
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisBackend;
pub use region::{EvictionPolicy, Region, RegionCatalog, RegionConfig};
pub use stats::{GlobalStats, RegionStats, StatsRegistry};
pub use sweeper::{ExpirySweeper, SweepOutcome};
