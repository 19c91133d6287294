//! Cache statistics export
//!
//! Publishes per-region statistics as Prometheus gauges and logs a periodic
//! summary. Gauges mirror the [`StatsRegistry`](crate::cache::StatsRegistry)
//! counters; they are refreshed by the [`StatsReporter`] loop and on every
//! scrape.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{Encoder, Gauge, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cache::{CacheFacade, GlobalStats};
use crate::error::{Error, Result};

const NAMESPACE: &str = "tiercache";

fn metric_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registry: {}", e))
}

/// Prometheus gauges for every region
#[derive(Clone)]
pub struct CacheMetrics {
    registry: Registry,
    hits: IntGaugeVec,
    misses: IntGaugeVec,
    puts: IntGaugeVec,
    evictions: IntGaugeVec,
    hit_rate: GaugeVec,
    ttl_seconds: GaugeVec,
    local_entries: IntGaugeVec,
    global_hit_rate: Gauge,
}

impl std::fmt::Debug for CacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMetrics").finish_non_exhaustive()
    }
}

impl CacheMetrics {
    /// Create the gauges in a dedicated registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let int_vec = |name: &str, help: &str| -> Result<IntGaugeVec> {
            let gauge = IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["region"])
                .map_err(metric_err)?;
            registry.register(Box::new(gauge.clone())).map_err(metric_err)?;
            Ok(gauge)
        };
        let float_vec = |name: &str, help: &str| -> Result<GaugeVec> {
            let gauge = GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["region"])
                .map_err(metric_err)?;
            registry.register(Box::new(gauge.clone())).map_err(metric_err)?;
            Ok(gauge)
        };

        let hits = int_vec("region_hits", "Cache hits per region")?;
        let misses = int_vec("region_misses", "Cache misses per region")?;
        let puts = int_vec("region_puts", "Cache writes per region")?;
        let evictions = int_vec("region_evictions", "Local entries evicted by capacity or expiry")?;
        let hit_rate = float_vec("region_hit_rate", "Hit rate per region (0..1)")?;
        let ttl_seconds = float_vec("region_ttl_seconds", "Current distributed TTL per region")?;
        let local_entries = int_vec("region_local_entries", "Entries held by the local tier")?;

        let global_hit_rate = Gauge::with_opts(
            Opts::new("global_hit_rate", "Hit rate across all regions (0..1)").namespace(NAMESPACE),
        )
        .map_err(metric_err)?;
        registry
            .register(Box::new(global_hit_rate.clone()))
            .map_err(metric_err)?;

        Ok(Self {
            registry,
            hits,
            misses,
            puts,
            evictions,
            hit_rate,
            ttl_seconds,
            local_entries,
            global_hit_rate,
        })
    }

    /// Refresh every gauge from the facade; returns the global totals
    pub fn update(&self, facade: &CacheFacade) -> GlobalStats {
        for region in facade.catalog().iter() {
            let name = region.name();
            let stats = facade.stats(name);

            self.hits.with_label_values(&[name]).set(stats.hits as i64);
            self.misses.with_label_values(&[name]).set(stats.misses as i64);
            self.puts.with_label_values(&[name]).set(stats.puts as i64);
            self.evictions
                .with_label_values(&[name])
                .set(stats.evictions as i64);
            self.hit_rate.with_label_values(&[name]).set(stats.hit_rate);
            self.ttl_seconds
                .with_label_values(&[name])
                .set(region.ttl().as_secs_f64());
            self.local_entries
                .with_label_values(&[name])
                .set(facade.local_len(name) as i64);
        }

        let global = facade.global_stats();
        self.global_hit_rate.set(global.hit_rate);
        global
    }

    /// Encode this registry plus the process-wide default registry
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut families = self.registry.gather();
        families.extend(prometheus::gather());

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(metric_err)?;
        Ok(buffer)
    }
}

/// Periodic statistics collection
#[derive(Debug)]
pub struct StatsReporter {
    facade: Arc<CacheFacade>,
    metrics: Arc<CacheMetrics>,
    interval: Duration,
}

impl StatsReporter {
    pub fn new(facade: Arc<CacheFacade>, metrics: Arc<CacheMetrics>, interval: Duration) -> Self {
        Self {
            facade,
            metrics,
            interval,
        }
    }

    /// Publish one round of statistics
    pub fn report(&self) -> GlobalStats {
        let global = self.metrics.update(&self.facade);

        for name in self.facade.regions() {
            let stats = self.facade.stats(name);
            if stats.requests() == 0 && stats.puts == 0 {
                continue;
            }
            debug!(
                region = %name,
                hits = stats.hits,
                misses = stats.misses,
                puts = stats.puts,
                evictions = stats.evictions,
                hit_rate = %format!("{:.2}%", stats.hit_rate * 100.0),
                "Cache region statistics"
            );
        }

        info!(
            regions = global.regions,
            hits = global.hits,
            misses = global.misses,
            hit_rate = %format!("{:.2}%", global.hit_rate * 100.0),
            "Cache statistics"
        );
        global
    }

    /// Report every interval until cancelled
    #[instrument(skip(self, cancel))]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Starting statistics reporter every {:?}", self.interval);

        let mut tick = interval_at(Instant::now() + self.interval, self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Statistics reporter shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.report();
                }
            }
        }
    }
}
