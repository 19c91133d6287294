//! Per-region cache statistics
//!
//! Lock-free counters keyed by region name. Entries are created lazily on
//! first touch and live for the rest of the process.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Live counters for a single region
#[derive(Debug, Default)]
pub struct RegionCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    /// Unix millis of the last update, 0 when never updated
    last_update_ms: AtomicI64,
}

impl RegionCounters {
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        match self.last_update_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits(), self.misses())
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.puts.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.touch();
    }
}

/// Point-in-time copy of a region's counters.
///
/// Each counter is loaded independently, so a snapshot taken under load may
/// mix values from slightly different moments.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegionStats {
    pub region: String,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub last_update: Option<DateTime<Utc>>,
}

impl RegionStats {
    /// Total lookups
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Sums across every region
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalStats {
    pub regions: usize,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// `hits / (hits + misses)`, 0.0 when there were no lookups
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Registry of per-region counters
#[derive(Debug, Default)]
pub struct StatsRegistry {
    regions: DashMap<String, Arc<RegionCounters>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for a region, created on first use
    pub fn counters(&self, region: &str) -> Arc<RegionCounters> {
        if let Some(counters) = self.regions.get(region) {
            return Arc::clone(counters.value());
        }
        Arc::clone(
            self.regions
                .entry(region.to_string())
                .or_default()
                .value(),
        )
    }

    pub fn incr_hit(&self, region: &str) {
        let c = self.counters(region);
        c.hits.fetch_add(1, Ordering::Relaxed);
        c.touch();
    }

    pub fn incr_miss(&self, region: &str) {
        let c = self.counters(region);
        c.misses.fetch_add(1, Ordering::Relaxed);
        c.touch();
    }

    pub fn incr_put(&self, region: &str) {
        let c = self.counters(region);
        c.puts.fetch_add(1, Ordering::Relaxed);
        c.touch();
    }

    pub fn incr_eviction(&self, region: &str) {
        self.add_evictions(region, 1);
    }

    pub fn add_evictions(&self, region: &str, n: u64) {
        if n == 0 {
            return;
        }
        let c = self.counters(region);
        c.evictions.fetch_add(n, Ordering::Relaxed);
        c.touch();
    }

    /// Hit rate of a region, 0.0 when untouched
    pub fn hit_rate(&self, region: &str) -> f64 {
        self.regions
            .get(region)
            .map(|c| c.hit_rate())
            .unwrap_or(0.0)
    }

    /// Snapshot of a region; all zeros when untouched
    pub fn snapshot(&self, region: &str) -> RegionStats {
        self.try_snapshot(region).unwrap_or_else(|| RegionStats {
            region: region.to_string(),
            ..Default::default()
        })
    }

    /// Snapshot of a region, `None` when it has never been touched
    pub fn try_snapshot(&self, region: &str) -> Option<RegionStats> {
        let counters = self.regions.get(region)?;
        Some(Self::build_snapshot(region, &counters))
    }

    fn build_snapshot(region: &str, c: &RegionCounters) -> RegionStats {
        let hits = c.hits();
        let misses = c.misses();
        let hit_rate = hit_rate(hits, misses);
        let miss_rate = if hits + misses == 0 { 0.0 } else { 1.0 - hit_rate };

        RegionStats {
            region: region.to_string(),
            hits,
            misses,
            puts: c.puts(),
            evictions: c.evictions(),
            hit_rate,
            miss_rate,
            last_update: c.last_update(),
        }
    }

    /// Zero a region's counters
    pub fn reset(&self, region: &str) {
        if let Some(counters) = self.regions.get(region) {
            counters.reset();
        }
    }

    pub fn reset_all(&self) {
        for entry in self.regions.iter() {
            entry.value().reset();
        }
    }

    /// Names of every region touched so far, sorted
    pub fn regions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.regions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshots of every touched region, sorted by name
    pub fn snapshot_all(&self) -> Vec<RegionStats> {
        let mut all: Vec<RegionStats> = self
            .regions
            .iter()
            .map(|e| Self::build_snapshot(e.key(), e.value()))
            .collect();
        all.sort_by(|a, b| a.region.cmp(&b.region));
        all
    }

    /// Totals across all regions
    pub fn global(&self) -> GlobalStats {
        let mut global = GlobalStats::default();
        for entry in self.regions.iter() {
            let c = entry.value();
            global.regions += 1;
            global.hits += c.hits();
            global.misses += c.misses();
            global.puts += c.puts();
            global.evictions += c.evictions();
        }
        global.hit_rate = hit_rate(global.hits, global.misses);
        global
    }
}

// =============================================================================
// Tests
// =============================================================================
