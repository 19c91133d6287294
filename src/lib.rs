//! tiercache - Two-Tier Adaptive Cache
//!
//! A process-local LRU cache layered in front of a shared distributed cache,
//! organised into named regions, with per-region statistics, hit-rate driven
//! TTL adaptation and background warm-up.
//!
//! # Architecture
//!
//! ```text
//!            business code
//!                 │
//!                 ▼
//!  ┌──────────────────────────────┐      ┌────────────────────────┐
//!  │         CacheFacade          │◀─────│ WarmupScheduler        │
//!  │  LocalTier ─▶ Distributed    │      │ startup + periodic     │
//!  └──────────────┬───────────────┘      └────────────────────────┘
//!                 │ hits / misses / puts / evictions
//!                 ▼
//!  ┌──────────────────────────────┐      ┌────────────────────────┐
//!  │        StatsRegistry         │─────▶│ AdaptivePolicyEngine   │
//!  └──────────────┬───────────────┘      │ TTL within [min, max]  │
//!                 │                      └────────────────────────┘
//!                 ▼
//!       StatsReporter / admin server
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tiercache::cache::{CacheFacade, RegionCatalog};
//!
//! # async fn demo() {
//! let facade = CacheFacade::in_memory(Arc::new(RegionCatalog::reference()));
//!
//! facade.put("users", "42", &"alice").await;
//! let name: Option<String> = facade.get("users", "42").await;
//! assert_eq!(name.as_deref(), Some("alice"));
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, regions, statistics and the facade
//! - [`adaptive`] - TTL adaptation engine
//! - [`warmup`] - Startup and periodic warm-up
//! - [`config`] - YAML settings
//! - [`metrics`] - Prometheus export and periodic reporting
//! - [`server`] - Admin HTTP endpoints
//! - [`error`] - Error types

pub mod adaptive;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod warmup;

// Re-export commonly used types
pub use adaptive::{AdaptiveConfig, AdaptivePolicyEngine, TtlDecision};
pub use cache::{CacheFacade, RegionCatalog, RegionConfig, RegionStats, StatsRegistry};
pub use config::CacheSettings;
pub use error::{Error, Result};
pub use warmup::{RegionLoader, WarmupScheduler};
