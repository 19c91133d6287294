//! Warm-up scheduling.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::loader::RegionLoader;
use super::{WarmupConfig, WarmupJob, WarmupReport, WarmupTrigger};
use crate::cache::CacheFacade;
use crate::error::{Error, Result};

/// Runs startup, periodic and manual warm-ups
pub struct WarmupScheduler {
    facade: Arc<CacheFacade>,
    config: WarmupConfig,
    loaders: HashMap<String, Arc<dyn RegionLoader>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    last_report: Mutex<Option<WarmupReport>>,
}

impl std::fmt::Debug for WarmupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut loaders: Vec<&String> = self.loaders.keys().collect();
        loaders.sort();
        f.debug_struct("WarmupScheduler")
            .field("config", &self.config)
            .field("loaders", &loaders)
            .finish()
    }
}

impl WarmupScheduler {
    pub fn new(facade: Arc<CacheFacade>, config: WarmupConfig) -> Self {
        Self {
            facade,
            config,
            loaders: HashMap::new(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            last_report: Mutex::new(None),
        }
    }

    /// Register the data source for a region
    pub fn with_loader(mut self, region: impl Into<String>, loader: impl RegionLoader + 'static) -> Self {
        self.register(region, Arc::new(loader));
        self
    }

    /// Register a shared data source for a region, replacing any previous one
    pub fn register(&mut self, region: impl Into<String>, loader: Arc<dyn RegionLoader>) {
        self.loaders.insert(region.into(), loader);
    }

    pub fn config(&self) -> &WarmupConfig {
        &self.config
    }

    /// Report of the most recently finished run
    pub fn last_report(&self) -> Option<WarmupReport> {
        self.last_report.lock().clone()
    }

    /// Check a region can be warmed and return its loader
    fn loader_for(&self, region: &str) -> Result<Arc<dyn RegionLoader>> {
        let entry = self.facade.catalog().require(region)?;
        if !entry.warmup_enabled() {
            return Err(Error::Config(format!("warm-up is disabled for region {}", region)));
        }
        self.loaders
            .get(region)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no warm-up loader registered for region {}", region)))
    }

    /// Warm one region now, waiting for it to finish.
    ///
    /// Returns the number of entries written.
    #[instrument(skip(self))]
    pub async fn warm_region(&self, region: &str) -> Result<usize> {
        let loader = self.loader_for(region)?;
        let written = spawn_load(self.facade.clone(), loader, region.to_string(), None)
            .await
            .unwrap_or_else(|e| Err(join_failure(region, e)))?;
        info!(region, written, "Region warmed");
        Ok(written)
    }

    /// Warm every core region now, waiting for all of them
    pub async fn warm_core(&self) -> WarmupReport {
        self.run_batch(self.core_targets(), WarmupTrigger::Manual).await
    }

    /// Clear every region, then warm the core regions again
    #[instrument(skip(self))]
    pub async fn refresh_all(&self) -> WarmupReport {
        info!("Refreshing all cache regions");
        self.facade.clear_all().await;
        self.run_batch(self.core_targets(), WarmupTrigger::Refresh).await
    }

    fn core_targets(&self) -> Vec<(String, Option<usize>)> {
        self.config
            .core_regions
            .iter()
            .map(|r| (r.clone(), None))
            .collect()
    }

    /// Load each target in its own task and collect the outcomes
    async fn run_batch(&self, targets: Vec<(String, Option<usize>)>, trigger: WarmupTrigger) -> WarmupReport {
        let mut report = WarmupReport::start(trigger);
        let mut pending = Vec::with_capacity(targets.len());

        for (region, limit) in targets {
            match self.loader_for(&region) {
                Ok(loader) => {
                    let handle = spawn_load(self.facade.clone(), loader, region.clone(), limit);
                    pending.push((region, handle));
                }
                Err(e) => {
                    warn!(region = %region, error = %e, "Skipping region warm-up");
                    report.skipped.push(region);
                }
            }
        }

        let (regions, handles): (Vec<String>, Vec<_>) = pending.into_iter().unzip();
        for (region, outcome) in regions.into_iter().zip(join_all(handles).await) {
            match outcome.unwrap_or_else(|e| Err(join_failure(&region, e))) {
                Ok(written) => {
                    debug!(region = %region, written, "Region warmed");
                    report.loaded.insert(region, written);
                }
                Err(e) => {
                    error!(region = %region, error = %e, "Region warm-up failed");
                    report.failed.insert(region, e.to_string());
                }
            }
        }

        report.finished_at = Utc::now();
        info!(
            run_id = %report.run_id,
            trigger = ?report.trigger,
            regions = report.loaded.len(),
            entries = report.total_loaded(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Cache warm-up finished"
        );

        *self.last_report.lock() = Some(report.clone());
        report
    }

    /// Start the core-region warm-up in the background and return at once
    pub fn spawn_startup(self: &Arc<Self>) {
        if !self.config.startup {
            debug!("Startup warm-up disabled");
            return;
        }

        info!("Starting background cache warm-up of {} core regions", self.config.core_regions.len());
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            scheduler
                .run_batch(scheduler.core_targets(), WarmupTrigger::Startup)
                .await;
        });
        self.tasks.lock().push(handle);
    }

    /// Start one background loop per periodic job, plus the core refresh
    pub fn start_periodic(self: &Arc<Self>) {
        if let Some(period) = self.config.core_refresh {
            let warmable = self
                .config
                .core_regions
                .iter()
                .any(|region| self.loader_for(region).is_ok());
            if warmable {
                let handle = tokio::spawn(Arc::clone(self).run_core_refresh(period));
                self.tasks.lock().push(handle);
            } else {
                debug!("No core region has a loader, core refresh not started");
            }
        }

        for job in &self.config.jobs {
            if let Err(e) = self.loader_for(&job.region) {
                warn!(region = %job.region, error = %e, "Periodic warm-up job not started");
                continue;
            }
            let handle = tokio::spawn(Arc::clone(self).run_job(job.clone()));
            self.tasks.lock().push(handle);
        }
    }

    #[instrument(skip(self), fields(region = %job.region))]
    async fn run_job(self: Arc<Self>, job: WarmupJob) {
        info!("Starting periodic warm-up every {:?}", job.interval);

        let mut tick = interval(job.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Periodic warm-up shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.run_batch(vec![(job.region.clone(), job.limit)], WarmupTrigger::Periodic)
                        .await;
                }
            }
        }
    }

    /// Re-warm the core regions every period. The first run waits one full
    /// period since startup warm-up already covered them.
    #[instrument(skip(self))]
    async fn run_core_refresh(self: Arc<Self>, period: std::time::Duration) {
        info!("Starting core region refresh every {:?}", period);

        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Core region refresh shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.run_batch(self.core_targets(), WarmupTrigger::Periodic).await;
                }
            }
        }
    }

    /// Stop periodic jobs and wait for in-flight warm-ups to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock());
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Warm-up task ended abnormally: {}", e);
            }
        }
        info!("Warm-up scheduler stopped");
    }
}

fn spawn_load(
    facade: Arc<CacheFacade>,
    loader: Arc<dyn RegionLoader>,
    region: String,
    limit: Option<usize>,
) -> JoinHandle<Result<usize>> {
    tokio::spawn(async move {
        let loaded = match limit {
            Some(n) => loader.load_top(&region, n).await,
            None => loader.load(&region).await,
        };
        let entries = loaded.map_err(|e| Error::Warmup {
            region: region.clone(),
            reason: format!("{:#}", e),
        })?;
        Ok(facade.warm(&region, entries).await)
    })
}

fn join_failure(region: &str, e: tokio::task::JoinError) -> Error {
    let reason = if e.is_panic() {
        "loader panicked".to_string()
    } else {
        format!("loader task cancelled: {}", e)
    };
    Error::Warmup {
        region: region.to_string(),
        reason,
    }
}

// =============================================================================
// Tests
// =============================================================================
