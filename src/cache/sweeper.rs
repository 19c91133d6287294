//! Background purge of expired entries.
//!
//! Expired entries are already invisible to readers; sweeping only returns
//! their memory and keeps eviction counts current for idle regions. The
//! distributed tier is swept too, for backends that do not expire keys on
//! their own.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::facade::CacheFacade;

/// Entries dropped by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub local: usize,
    pub distributed: u64,
}

/// Periodic expired-entry sweeper
#[derive(Debug)]
pub struct ExpirySweeper {
    facade: Arc<CacheFacade>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(facade: Arc<CacheFacade>, interval: Duration) -> Self {
        Self { facade, interval }
    }

    /// Run one sweep over both tiers
    pub async fn sweep(&self) -> SweepOutcome {
        let local = self.facade.purge_expired();
        let distributed = match self.facade.distributed().purge_expired().await {
            Ok(n) => n,
            Err(e) => {
                warn!(operation = "purge_expired", error = %e, "Distributed cache unavailable");
                0
            }
        };

        if local > 0 || distributed > 0 {
            debug!(local, distributed, "Swept expired cache entries");
        }
        SweepOutcome { local, distributed }
    }

    /// Sweep every interval until cancelled
    #[instrument(skip(self, cancel))]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Starting expiry sweeper every {:?}", self.interval);

        let mut tick = interval_at(Instant::now() + self.interval, self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Expiry sweeper shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}
