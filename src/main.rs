//! tiercache daemon
//!
//! Runs the cache with its background loops and the admin server.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        tiercache                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐           │
//! │  │  Adaptive  │   │  Warm-up   │   │  Expiry    │           │
//! │  │  TTL       │   │  Scheduler │   │  Sweeper   │           │
//! │  └─────┬──────┘   └─────┬──────┘   └─────┬──────┘           │
//! │        └────────────────┼────────────────┘                  │
//! │                    CacheFacade ─── Stats Reporter           │
//! │                         │                                   │
//! │                    Admin server (/stats, /metrics)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::cache::{
    system_clock, CacheFacade, DistributedBackend, DistributedTier, ExpirySweeper, InMemoryBackend,
    SharedClock, StatsRegistry,
};
use tiercache::config::{BackendKind, CacheSettings};
use tiercache::metrics::{CacheMetrics, StatsReporter};
use tiercache::server::{self, AdminState};
use tiercache::warmup::{StaticLoader, WarmupScheduler};
use tiercache::{AdaptivePolicyEngine, Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// tiercache - two-tier adaptive cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML settings file; the reference regions are used when omitted
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Admin server bind address
    #[arg(long, env = "ADMIN_ADDR", default_value = "0.0.0.0:8080")]
    admin_addr: String,

    /// Redis URL; selects the redis backend and overrides the settings file
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Do not warm the core regions at startup
    #[arg(long, env = "SKIP_WARMUP")]
    skip_warmup: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting tiercache");

    let mut settings = match &args.config {
        Some(path) => {
            info!("  Settings: {}", path.display());
            CacheSettings::load(path)?
        }
        None => {
            info!("  Settings: built-in reference regions");
            CacheSettings::default()
        }
    };

    if let Some(url) = &args.redis_url {
        settings.distributed.backend = BackendKind::Redis;
        settings.distributed.url = Some(url.clone());
    }
    if args.skip_warmup {
        settings.warmup.startup = false;
    }
    settings.validate()?;

    let catalog = Arc::new(settings.catalog()?);
    info!("  Regions: {}", catalog.names().join(", "));
    info!("  Distributed backend: {}", settings.distributed.backend);
    info!("  Key prefix: {}", settings.key_prefix);

    let clock = system_clock();
    let backend = connect_backend(&settings, clock.clone()).await?;
    let stats = Arc::new(StatsRegistry::new());
    let facade = Arc::new(CacheFacade::new(
        catalog.clone(),
        DistributedTier::new(backend, settings.key_prefix.clone()),
        stats.clone(),
        clock,
    ));
    let metrics = Arc::new(CacheMetrics::new()?);

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    // Adaptive TTL engine
    if settings.adaptive.enabled {
        let engine = Arc::new(AdaptivePolicyEngine::new(
            catalog.clone(),
            stats.clone(),
            settings.adaptive.to_config()?,
        ));
        handles.push(tokio::spawn(engine.run(cancel.clone())));
    } else {
        info!("Adaptive TTL engine disabled");
    }

    // Expiry sweeper and statistics reporter
    let sweeper = Arc::new(ExpirySweeper::new(
        facade.clone(),
        settings.stats.sweep_interval()?,
    ));
    handles.push(tokio::spawn(sweeper.run(cancel.clone())));

    let reporter = Arc::new(StatsReporter::new(
        facade.clone(),
        metrics.clone(),
        settings.stats.report_interval()?,
    ));
    handles.push(tokio::spawn(reporter.run(cancel.clone())));

    // Warm-up
    let warmup = if settings.warmup.enabled {
        let mut scheduler = WarmupScheduler::new(facade.clone(), settings.warmup.to_config()?);
        if !settings.warmup.seed.is_empty() {
            let seed: Arc<StaticLoader> = Arc::new(StaticLoader::new(settings.warmup.seed.clone()));
            for region in seed.regions() {
                scheduler.register(region.clone(), seed.clone());
            }
        }
        let scheduler = Arc::new(scheduler);
        scheduler.spawn_startup();
        scheduler.start_periodic();
        Some(scheduler)
    } else {
        info!("Warm-up disabled");
        None
    };

    // Admin server
    let state = AdminState {
        facade: facade.clone(),
        metrics,
        warmup: warmup.clone(),
    };
    let admin_addr = args.admin_addr.clone();
    let admin_cancel = cancel.clone();
    let admin = tokio::spawn(async move {
        if let Err(e) = server::serve(&admin_addr, state, admin_cancel).await {
            error!("Admin server error: {}", e);
        }
    });

    info!("tiercache ready");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Internal(format!("Failed to listen for shutdown signal: {}", e)))?;

    info!("Shutdown signal received");
    cancel.cancel();

    if let Some(scheduler) = &warmup {
        scheduler.shutdown().await;
    }
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    if let Err(e) = admin.await {
        warn!("Admin server task ended abnormally: {}", e);
    }

    info!("tiercache shutdown complete");
    Ok(())
}

// =============================================================================
// Backend Setup
// =============================================================================

async fn connect_backend(
    settings: &CacheSettings,
    clock: SharedClock,
) -> Result<Arc<dyn DistributedBackend>> {
    match settings.distributed.backend {
        BackendKind::Memory => {
            warn!("Using in-memory distributed backend; entries are not shared between processes");
            Ok(Arc::new(InMemoryBackend::new(clock)))
        }
        BackendKind::Redis => connect_redis(settings).await,
    }
}

#[cfg(feature = "redis-backend")]
async fn connect_redis(settings: &CacheSettings) -> Result<Arc<dyn DistributedBackend>> {
    let url = settings
        .distributed
        .url
        .as_deref()
        .ok_or_else(|| Error::Config("distributed.url is required for the redis backend".into()))?;
    let backend =
        tiercache::cache::RedisBackend::connect(url, settings.distributed.command_timeout()?).await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "redis-backend"))]
async fn connect_redis(_settings: &CacheSettings) -> Result<Arc<dyn DistributedBackend>> {
    Err(Error::Config(
        "redis backend requested but tiercache was built without the redis-backend feature".into(),
    ))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "redis=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
