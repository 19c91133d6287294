//! Adaptive TTL Policy Engine
//!
//! Periodically retunes each region's distributed TTL from its hit rate.
//!
//! # Rules
//!
//! - hit rate below the low watermark: TTL doubles, capped at `max_ttl`
//! - hit rate above the high watermark: TTL halves, floored at `min_ttl`
//! - anything in between holds (hysteresis band)
//!
//! A region with no lookups yet carries no signal and is skipped for that
//! tick. TTL changes apply to entries written afterwards only.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cache::{Region, RegionCatalog, StatsRegistry};
use crate::error::{Error, Result};

/// Default time between adaptation passes
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Default hit rate below which TTL grows
pub const DEFAULT_LOW_WATERMARK: f64 = 0.70;

/// Default hit rate above which TTL shrinks
pub const DEFAULT_HIGH_WATERMARK: f64 = 0.90;

/// Adaptive engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    pub interval: Duration,
    pub low_watermark: f64,
    pub high_watermark: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            low_watermark: DEFAULT_LOW_WATERMARK,
            high_watermark: DEFAULT_HIGH_WATERMARK,
        }
    }
}

impl AdaptiveConfig {
    /// Require `0 <= low < high <= 1` and a positive interval
    pub fn validate(&self) -> Result<()> {
        let (low, high) = (self.low_watermark, self.high_watermark);
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) {
            return Err(Error::Config(format!(
                "adaptive watermarks must be within [0, 1], got low={} high={}",
                low, high
            )));
        }
        if low >= high {
            return Err(Error::Config(format!(
                "adaptive low watermark {} must be below high watermark {}",
                low, high
            )));
        }
        if self.interval.is_zero() {
            return Err(Error::Config("adaptive interval must be positive".into()));
        }
        Ok(())
    }
}

/// Outcome of evaluating one region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlDecision {
    /// Hit rate too low: keep entries longer
    Increase { from: Duration, to: Duration },
    /// Hit rate high: entries can turn over faster
    Decrease { from: Duration, to: Duration },
    /// In the band, or already at the relevant bound
    Hold { ttl: Duration },
}

impl TtlDecision {
    /// TTL after the decision
    pub fn ttl(&self) -> Duration {
        match *self {
            TtlDecision::Increase { to, .. } | TtlDecision::Decrease { to, .. } => to,
            TtlDecision::Hold { ttl } => ttl,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, TtlDecision::Hold { .. })
    }
}

/// Decide a region's next TTL from its hit rate
pub fn decide(
    hit_rate: f64,
    current: Duration,
    min_ttl: Duration,
    max_ttl: Duration,
    config: &AdaptiveConfig,
) -> TtlDecision {
    if hit_rate < config.low_watermark {
        let to = current.saturating_mul(2).min(max_ttl);
        if to > current {
            return TtlDecision::Increase { from: current, to };
        }
    } else if hit_rate > config.high_watermark {
        let to = (current / 2).max(min_ttl);
        if to < current {
            return TtlDecision::Decrease { from: current, to };
        }
    }
    TtlDecision::Hold { ttl: current }
}

/// Decision taken for one region during a tick
#[derive(Debug, Clone, PartialEq)]
pub struct RegionDecision {
    pub region: String,
    pub hit_rate: f64,
    pub decision: TtlDecision,
}

/// Result of one adaptation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub decisions: Vec<RegionDecision>,
    /// Regions without lookups yet
    pub skipped: Vec<String>,
}

impl TickReport {
    pub fn decision(&self, region: &str) -> Option<&TtlDecision> {
        self.decisions
            .iter()
            .find(|d| d.region == region)
            .map(|d| &d.decision)
    }

    /// Number of regions whose TTL changed
    pub fn changed(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.decision.is_change())
            .count()
    }
}

/// Adaptive TTL engine
#[derive(Debug)]
pub struct AdaptivePolicyEngine {
    catalog: Arc<RegionCatalog>,
    stats: Arc<StatsRegistry>,
    config: AdaptiveConfig,
}

impl AdaptivePolicyEngine {
    pub fn new(catalog: Arc<RegionCatalog>, stats: Arc<StatsRegistry>, config: AdaptiveConfig) -> Self {
        Self {
            catalog,
            stats,
            config,
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Evaluate every region once and apply the decisions
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for region in self.catalog.iter() {
            match self.stats.try_snapshot(region.name()) {
                Some(snapshot) if snapshot.requests() > 0 => {
                    let decision = self.apply(region, snapshot.hit_rate);
                    report.decisions.push(RegionDecision {
                        region: region.name().to_string(),
                        hit_rate: snapshot.hit_rate,
                        decision,
                    });
                }
                _ => {
                    debug!(region = region.name(), "No lookups yet, skipping TTL adaptation");
                    report.skipped.push(region.name().to_string());
                }
            }
        }

        report
    }

    fn apply(&self, region: &Region, hit_rate: f64) -> TtlDecision {
        let decision = decide(
            hit_rate,
            region.ttl(),
            region.min_ttl(),
            region.max_ttl(),
            &self.config,
        );

        match decision {
            TtlDecision::Increase { from, to } => {
                region.set_ttl(to);
                info!(
                    region = region.name(),
                    hit_rate,
                    "Low hit rate, TTL increased {:?} -> {:?}",
                    from,
                    to
                );
            }
            TtlDecision::Decrease { from, to } => {
                region.set_ttl(to);
                info!(
                    region = region.name(),
                    hit_rate,
                    "High hit rate, TTL decreased {:?} -> {:?}",
                    from,
                    to
                );
            }
            TtlDecision::Hold { ttl } => {
                debug!(region = region.name(), hit_rate, "TTL held at {:?}", ttl);
            }
        }

        decision
    }

    /// Run an adaptation pass every interval until cancelled
    #[instrument(skip(self, cancel))]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Starting adaptive TTL engine with {:?}", self.config);

        let period = self.config.interval;
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Adaptive TTL engine shutting down");
                    break;
                }
                _ = tick.tick() => {
                    let report = self.tick();
                    info!(
                        evaluated = report.decisions.len(),
                        changed = report.changed(),
                        skipped = report.skipped.len(),
                        "Adaptive TTL pass complete"
                    );
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
