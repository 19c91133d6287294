//! Integration tests for tiercache
//!
//! Exercise the facade, adaptive engine and warm-up scheduler together
//! through the public API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde::{Deserialize, Serialize};

use tiercache::adaptive::{AdaptiveConfig, AdaptivePolicyEngine, TtlDecision};
use tiercache::cache::{
    CacheFacade, DistributedTier, InMemoryBackend, ManualClock, RegionCatalog, RegionConfig,
    StatsRegistry,
};
use tiercache::config::CacheSettings;
use tiercache::warmup::{FnLoader, LoadedEntries, StaticLoader, WarmupConfig, WarmupScheduler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

fn user(id: u64, name: &str) -> User {
    User {
        id,
        name: name.to_string(),
    }
}

struct Harness {
    facade: Arc<CacheFacade>,
    backend: Arc<InMemoryBackend>,
    clock: Arc<ManualClock>,
}

fn harness_with(catalog: RegionCatalog) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let backend = Arc::new(InMemoryBackend::new(clock.clone()));
    let facade = Arc::new(CacheFacade::new(
        Arc::new(catalog),
        DistributedTier::new(backend.clone(), "cache:"),
        Arc::new(StatsRegistry::new()),
        clock.clone(),
    ));
    Harness {
        facade,
        backend,
        clock,
    }
}

fn harness() -> Harness {
    harness_with(RegionCatalog::reference())
}

/// Second facade sharing the backend but with its own local tier
fn peer(h: &Harness) -> CacheFacade {
    CacheFacade::new(
        h.facade.catalog().clone(),
        DistributedTier::new(h.backend.clone(), "cache:"),
        Arc::new(StatsRegistry::new()),
        h.clock.clone(),
    )
}

// =============================================================================
// Facade
// =============================================================================

#[tokio::test]
async fn test_put_then_get_round_trip() {
    let h = harness();
    h.facade.put("users", "42", &user(42, "alice")).await;

    let found: Option<User> = h.facade.get("users", "42").await;
    assert_eq!(found, Some(user(42, "alice")));

    let stats = h.facade.stats("users");
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.puts, 1);
}

#[tokio::test]
async fn test_miss_in_both_tiers() {
    let h = harness();
    let found: Option<User> = h.facade.get("users", "missing").await;
    assert!(found.is_none());

    let stats = h.facade.stats("users");
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.hit_rate, 0.0);
}

#[tokio::test]
async fn test_distributed_hit_repopulates_local() {
    let h = harness();
    let other = peer(&h);

    other.put("roles", "admin", &vec!["read", "write"]).await;
    assert_eq!(h.facade.local_len("roles"), 0);

    let found: Option<Vec<String>> = h.facade.get("roles", "admin").await;
    assert_eq!(found, Some(vec!["read".to_string(), "write".to_string()]));
    assert_eq!(h.facade.local_len("roles"), 1);

    // Served locally even once the shared tier loses it
    h.backend.set_available(false);
    let again: Option<Vec<String>> = h.facade.get("roles", "admin").await;
    assert!(again.is_some());
    assert_eq!(h.facade.stats("roles").hits, 2);
}

#[tokio::test]
async fn test_capacity_eviction_counts() {
    let catalog = RegionCatalog::new([RegionConfig::new("tiny").with_max_size(2)]).unwrap();
    let h = harness_with(catalog);

    h.facade.put("tiny", "a", &1).await;
    h.facade.put("tiny", "b", &2).await;
    // Touch "a" so "b" is least recently used
    let _ = h.facade.get::<i32>("tiny", "a").await;
    h.facade.put("tiny", "c", &3).await;

    assert_eq!(h.facade.local_len("tiny"), 2);
    assert_eq!(h.facade.stats("tiny").evictions, 1);

    // "b" is gone locally but still in the shared tier
    h.backend.set_available(false);
    assert_eq!(h.facade.get::<i32>("tiny", "b").await, None);
    assert_eq!(h.facade.get::<i32>("tiny", "a").await, Some(1));
}

#[tokio::test]
async fn test_local_expiry_falls_back_to_distributed() {
    let h = harness();
    h.facade.put("users", "1", &user(1, "bob")).await;

    // Past the 10 minute idle limit, inside the 15 minute distributed TTL
    h.clock.advance(Duration::from_secs(11 * 60));
    let found: Option<User> = h.facade.get("users", "1").await;
    assert_eq!(found, Some(user(1, "bob")));

    let stats = h.facade.stats("users");
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn test_entry_expires_in_both_tiers() {
    let h = harness();
    h.facade.put("users", "1", &user(1, "bob")).await;

    h.clock.advance(Duration::from_secs(16 * 60));
    let found: Option<User> = h.facade.get("users", "1").await;
    assert!(found.is_none());
    assert_eq!(h.facade.stats("users").misses, 1);
}

#[tokio::test]
async fn test_hit_rate_math() {
    let h = harness();
    h.facade.put("config", "theme", &"dark").await;

    for _ in 0..3 {
        let _ = h.facade.get::<String>("config", "theme").await;
    }
    let _ = h.facade.get::<String>("config", "missing").await;

    let stats = h.facade.stats("config");
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
    assert!((stats.miss_rate - 0.25).abs() < f64::EPSILON);

    let global = h.facade.global_stats();
    assert_eq!(global.hits, 3);
    assert_eq!(global.misses, 1);
}

#[tokio::test]
async fn test_unknown_region_fails_open() {
    let h = harness();
    h.facade.put("nope", "k", &1).await;
    h.facade.evict("nope", "k").await;
    h.facade.clear("nope").await;

    assert_eq!(h.facade.get::<i32>("nope", "k").await, None);
    assert!(!h.facade.contains("nope", "k").await);
    assert_eq!(h.facade.warm("nope", vec![("k".to_string(), 1)]).await, 0);
    assert!(h.facade.stats_registry().regions().is_empty());
}

#[tokio::test]
async fn test_distributed_outage_is_transparent() {
    let h = harness();
    h.backend.set_available(false);

    h.facade.put("users", "7", &user(7, "carol")).await;
    assert_eq!(h.facade.get::<User>("users", "7").await, Some(user(7, "carol")));
    assert_eq!(h.facade.get::<User>("users", "8").await, None);

    h.facade.evict("users", "7").await;
    assert_eq!(h.facade.get::<User>("users", "7").await, None);
}

#[tokio::test]
async fn test_null_put_evicts() {
    let h = harness();
    h.facade.put("users", "1", &user(1, "dave")).await;
    h.facade.put("users", "1", &Option::<User>::None).await;

    assert!(!h.facade.contains("users", "1").await);
    assert!(h.backend.is_empty());
    assert_eq!(h.facade.stats("users").puts, 1);
}

#[tokio::test]
async fn test_evict_many_and_clear() {
    let h = harness();
    for i in 0..5 {
        h.facade.put("departments", &i.to_string(), &i).await;
    }
    h.facade.put("roles", "admin", &"all").await;

    h.facade.evict_many("departments", ["0", "1"]).await;
    assert!(!h.facade.contains("departments", "0").await);
    assert!(h.facade.contains("departments", "2").await);

    h.facade.clear("departments").await;
    assert_eq!(h.facade.local_len("departments"), 0);
    assert!(!h.facade.contains("departments", "3").await);
    // Other regions untouched
    assert!(h.facade.contains("roles", "admin").await);
    // Explicit removal is not an eviction
    assert_eq!(h.facade.stats("departments").evictions, 0);
}

#[tokio::test]
async fn test_ttl_change_applies_to_new_writes_only() {
    let h = harness();
    let users = h.facade.catalog().get("users").unwrap().clone();

    h.facade.put("users", "old", &1).await;
    users.set_ttl(Duration::from_secs(60 * 60));
    h.facade.put("users", "new", &2).await;

    let old = h.backend.ttl_remaining("cache:users:old").unwrap();
    let new = h.backend.ttl_remaining("cache:users:new").unwrap();
    assert_eq!(old, Duration::from_secs(15 * 60));
    assert_eq!(new, Duration::from_secs(60 * 60));
}

#[tokio::test]
async fn test_get_or_compute() {
    let h = harness();
    let calls = AtomicUsize::new(0);

    let first: Result<Option<User>, String> = h
        .facade
        .get_or_compute("users", "9", |key| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Some(user(key.parse().unwrap(), "erin"))) }
        })
        .await;
    assert_eq!(first, Ok(Some(user(9, "erin"))));

    let second: Result<Option<User>, String> = h
        .facade
        .get_or_compute("users", "9", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) }
        })
        .await;
    assert_eq!(second, Ok(Some(user(9, "erin"))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let absent: Result<Option<User>, String> = h
        .facade
        .get_or_compute("users", "10", |_| async { Ok(None) })
        .await;
    assert_eq!(absent, Ok(None));
    assert!(!h.facade.contains("users", "10").await);

    let failed: Result<Option<User>, String> = h
        .facade
        .get_or_compute("users", "11", |_| async { Err("database down".to_string()) })
        .await;
    assert_eq!(failed, Err("database down".to_string()));
    assert!(!h.facade.contains("users", "11").await);
}

#[tokio::test]
async fn test_concurrent_access() {
    let h = harness();
    let mut handles = Vec::new();

    for worker in 0..8u64 {
        let facade = h.facade.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..50u64 {
                let key = format!("{}-{}", worker, i);
                facade.put("archives", &key, &i).await;
                assert_eq!(facade.get::<u64>("archives", &key).await, Some(i));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = h.facade.stats("archives");
    assert_eq!(stats.puts, 400);
    assert_eq!(stats.hits, 400);
    assert_eq!(h.facade.local_len("archives"), 400);
}

// =============================================================================
// Adaptive TTL
// =============================================================================

#[tokio::test]
async fn test_adaptive_ttl_stays_within_bounds() {
    let h = harness();
    let engine = AdaptivePolicyEngine::new(
        h.facade.catalog().clone(),
        h.facade.stats_registry().clone(),
        AdaptiveConfig::default(),
    );

    // All misses: TTL doubles until it reaches the maximum
    for i in 0..10 {
        let _ = h.facade.get::<i32>("users", &format!("absent-{}", i)).await;
    }
    let users = h.facade.catalog().get("users").unwrap().clone();
    for _ in 0..6 {
        engine.tick();
    }
    assert_eq!(users.ttl(), users.max_ttl());
    assert_matches!(engine.tick().decision("users"), Some(TtlDecision::Hold { .. }));

    // All hits: TTL halves down to the minimum
    h.facade.reset_stats("users");
    h.facade.put("users", "1", &1).await;
    for _ in 0..10 {
        let _ = h.facade.get::<i32>("users", "1").await;
    }
    for _ in 0..10 {
        engine.tick();
    }
    assert_eq!(users.ttl(), users.min_ttl());
}

#[tokio::test]
async fn test_adaptive_skips_idle_regions() {
    let h = harness();
    let engine = AdaptivePolicyEngine::new(
        h.facade.catalog().clone(),
        h.facade.stats_registry().clone(),
        AdaptiveConfig::default(),
    );

    let report = engine.tick();
    assert_eq!(report.changed(), 0);
    assert!(report.decision("users").is_none());
    assert_eq!(
        h.facade.catalog().get("users").unwrap().ttl(),
        Duration::from_secs(15 * 60)
    );
}

// =============================================================================
// Warm-up
// =============================================================================

fn entries(pairs: &[(&str, serde_json::Value)]) -> LoadedEntries {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_warmup_failure_is_isolated() {
    let h = harness();
    let mut seed = HashMap::new();
    seed.insert("users".to_string(), entries(&[("1", serde_json::json!({"id": 1, "name": "alice"}))]));
    seed.insert("roles".to_string(), entries(&[("admin", serde_json::json!(["all"]))]));
    let seed = Arc::new(StaticLoader::new(seed));

    let mut scheduler = WarmupScheduler::new(h.facade.clone(), WarmupConfig::default());
    scheduler.register("users", seed.clone());
    scheduler.register("roles", seed);
    scheduler.register(
        "permissions",
        Arc::new(FnLoader::new(|_region: String| async {
            Err::<LoadedEntries, _>(anyhow::anyhow!("directory offline"))
        })),
    );

    let report = scheduler.warm_core().await;
    assert!(!report.is_success());
    assert_eq!(report.loaded.get("users"), Some(&1));
    assert_eq!(report.loaded.get("roles"), Some(&1));
    assert!(report.failed["permissions"].contains("directory offline"));
    // No loader registered
    assert!(report.skipped.contains(&"departments".to_string()));

    assert_eq!(h.facade.get::<User>("users", "1").await, Some(user(1, "alice")));
    assert!(h.facade.contains("roles", "admin").await);
}

#[tokio::test]
async fn test_startup_warmup_does_not_block() {
    let h = harness();
    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let gate = Arc::new(tokio::sync::Mutex::new(Some(gate)));

    let loader = FnLoader::new(move |_region: String| {
        let gate = gate.clone();
        async move {
            if let Some(rx) = gate.lock().await.take() {
                let _ = rx.await;
            }
            Ok::<_, anyhow::Error>(entries(&[("1", serde_json::json!({"id": 1, "name": "slow"}))]))
        }
    });

    let config = WarmupConfig {
        core_regions: vec!["users".to_string()],
        jobs: Vec::new(),
        ..WarmupConfig::default()
    };
    let scheduler = Arc::new(WarmupScheduler::new(h.facade.clone(), config).with_loader("users", loader));

    scheduler.spawn_startup();
    // Returned before the loader finished
    assert!(scheduler.last_report().is_none());
    assert!(!h.facade.contains("users", "1").await);

    release.send(()).unwrap();
    scheduler.shutdown().await;

    let report = scheduler.last_report().unwrap();
    assert_eq!(report.total_loaded(), 1);
    assert!(h.facade.contains("users", "1").await);
}

#[tokio::test]
async fn test_refresh_all_reloads_core_regions() {
    let h = harness();
    h.facade.put("users", "stale", &1).await;
    h.facade.put("archives", "old", &2).await;

    let mut seed = HashMap::new();
    seed.insert("users".to_string(), entries(&[("fresh", serde_json::json!(3))]));
    let scheduler = WarmupScheduler::new(h.facade.clone(), WarmupConfig::default())
        .with_loader("users", StaticLoader::new(seed));

    let report = scheduler.refresh_all().await;
    assert_eq!(report.loaded.get("users"), Some(&1));
    assert!(!h.facade.contains("users", "stale").await);
    assert!(!h.facade.contains("archives", "old").await);
    assert!(h.facade.contains("users", "fresh").await);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_settings_build_catalog() {
    let yaml = r#"
key_prefix: "app:"
regions:
  - name: sessions
    max_size: 10
    ttl: 5m
    min_ttl: 1m
    max_ttl: 1h
  - name: profiles
    warmup: true
adaptive:
  interval: 10m
  low_watermark: 0.5
  high_watermark: 0.8
warmup:
  core_regions: [profiles]
  jobs: []
  seed:
    profiles:
      "1": { "name": "alice" }
"#;
    let settings = CacheSettings::from_yaml_str(yaml).unwrap();
    settings.validate().unwrap();

    let catalog = settings.catalog().unwrap();
    assert_eq!(catalog.names(), ["sessions".to_string(), "profiles".to_string()]);
    let sessions = catalog.get("sessions").unwrap();
    assert_eq!(sessions.ttl(), Duration::from_secs(300));
    assert_eq!(sessions.min_ttl(), Duration::from_secs(60));
    assert_eq!(sessions.config().max_size, 10);
    assert!(catalog.get("profiles").unwrap().warmup_enabled());

    let adaptive = settings.adaptive.to_config().unwrap();
    assert_eq!(adaptive.interval, Duration::from_secs(600));
    assert_eq!(adaptive.low_watermark, 0.5);
}

#[test]
fn test_settings_reject_bad_values() {
    assert!(CacheSettings::from_yaml_str("unknown_field: 1").is_err());
    assert!(CacheSettings::from_yaml_str("regions:\n  - name: a\n    ttl: soon\n")
        .and_then(|s| s.validate())
        .is_err());
    assert!(CacheSettings::from_yaml_str("distributed:\n  backend: redis\n")
        .and_then(|s| s.validate())
        .is_err());
}

#[tokio::test]
async fn test_settings_drive_a_working_cache() {
    let settings = CacheSettings::default();
    settings.validate().unwrap();

    let facade = CacheFacade::in_memory(Arc::new(settings.catalog().unwrap()));
    facade.put("permissions", "u1", &vec!["read"]).await;
    assert_eq!(
        facade.get::<Vec<String>>("permissions", "u1").await,
        Some(vec!["read".to_string()])
    );
}
