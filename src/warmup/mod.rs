//! Cache Warm-Up
//!
//! Populates regions from their data sources so the first requests after
//! startup, and hot regions during operation, hit the cache.
//!
//! - Startup warm-up loads the core regions in the background; startup never
//!   waits for it
//! - Periodic jobs reload hot regions (bounded top-N) on their own period
//! - The core regions are re-warmed on a slower period (hourly by default)
//! - Each region loads in its own task; a failing or panicking loader only
//!   affects its own region

mod loader;
mod scheduler;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub use loader::{FnLoader, LoadedEntries, RegionLoader, StaticLoader};
pub use scheduler::WarmupScheduler;

/// Default period for re-warming the core regions
pub const DEFAULT_CORE_REFRESH: Duration = Duration::from_secs(3600);

/// Regions warmed at startup by default
pub const DEFAULT_CORE_REGIONS: [&str; 5] = ["users", "permissions", "roles", "departments", "config"];

/// Periodic reload of one hot region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupJob {
    pub region: String,
    pub interval: Duration,
    /// Load at most this many entries
    pub limit: Option<usize>,
}

impl WarmupJob {
    pub fn new(region: impl Into<String>, interval: Duration) -> Self {
        Self {
            region: region.into(),
            interval,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Warm-up configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WarmupConfig {
    /// Warm the core regions when the scheduler starts
    pub startup: bool,
    pub core_regions: Vec<String>,
    /// Re-warm the core regions this often; `None` disables it
    pub core_refresh: Option<Duration>,
    pub jobs: Vec<WarmupJob>,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            startup: true,
            core_regions: DEFAULT_CORE_REGIONS.iter().map(|s| s.to_string()).collect(),
            core_refresh: Some(DEFAULT_CORE_REFRESH),
            jobs: vec![
                WarmupJob::new("archives", Duration::from_secs(5 * 60)).with_limit(10),
                WarmupJob::new("statistics", Duration::from_secs(2 * 60)),
            ],
        }
    }
}

/// What started a warm-up run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupTrigger {
    Startup,
    Periodic,
    Manual,
    Refresh,
}

/// Outcome of one warm-up run
#[derive(Debug, Clone, Serialize)]
pub struct WarmupReport {
    pub run_id: Uuid,
    pub trigger: WarmupTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Entries written per region
    pub loaded: BTreeMap<String, usize>,
    /// Failure reason per region
    pub failed: BTreeMap<String, String>,
    /// Regions that could not be warmed (unknown, disabled, no loader)
    pub skipped: Vec<String>,
}

impl WarmupReport {
    fn start(trigger: WarmupTrigger) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            trigger,
            started_at: now,
            finished_at: now,
            loaded: BTreeMap::new(),
            failed: BTreeMap::new(),
            skipped: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Entries written across all regions
    pub fn total_loaded(&self) -> usize {
        self.loaded.values().sum()
    }
}
