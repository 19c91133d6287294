//! Cache configuration
//!
//! Loaded once at startup from YAML. Durations are strings such as `30m`,
//! `1h30m`, `500ms` or a bare number of seconds. Every section is optional;
//! an empty file yields the reference region set with default tuning.
//!
//! ```yaml
//! key_prefix: "archive:cache:"
//! defaults:
//!   max_size: 1000
//!   ttl: 1h
//! regions:
//!   - name: users
//!     max_size: 1000
//!     ttl: 15m
//!     max_ttl: 4h
//!     warmup: true
//! adaptive:
//!   interval: 30m
//!   low_watermark: 0.7
//!   high_watermark: 0.9
//! distributed:
//!   backend: redis
//!   url: redis://127.0.0.1:6379/0
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adaptive::AdaptiveConfig;
use crate::cache::region::{reference_regions, EvictionPolicy, RegionConfig, DEFAULT_MAX_SIZE};
use crate::cache::{RegionCatalog, DEFAULT_KEY_PREFIX};
use crate::error::{Error, Result};
use crate::warmup::{LoadedEntries, WarmupConfig, WarmupJob, DEFAULT_CORE_REGIONS};

// =============================================================================
// Settings
// =============================================================================

/// Top-level cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Prefix for every distributed key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Values used by regions that omit a setting
    #[serde(default)]
    pub defaults: RegionDefaults,

    /// Region catalogue; empty means the reference region set
    #[serde(default)]
    pub regions: Vec<RegionSettings>,

    #[serde(default)]
    pub adaptive: AdaptiveSettings,

    #[serde(default)]
    pub warmup: WarmupSettings,

    #[serde(default)]
    pub stats: StatsSettings,

    #[serde(default)]
    pub distributed: DistributedSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            defaults: RegionDefaults::default(),
            regions: Vec::new(),
            adaptive: AdaptiveSettings::default(),
            warmup: WarmupSettings::default(),
            stats: StatsSettings::default(),
            distributed: DistributedSettings::default(),
        }
    }
}

/// Region values applied when a region omits them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionDefaults {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_expire_after_write")]
    pub expire_after_write: String,
    #[serde(default = "default_expire_after_access")]
    pub expire_after_access: String,
    #[serde(default = "default_ttl")]
    pub ttl: String,
    #[serde(default = "default_min_ttl")]
    pub min_ttl: String,
    #[serde(default = "default_max_ttl")]
    pub max_ttl: String,
}

impl Default for RegionDefaults {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            expire_after_write: default_expire_after_write(),
            expire_after_access: default_expire_after_access(),
            ttl: default_ttl(),
            min_ttl: default_min_ttl(),
            max_ttl: default_max_ttl(),
        }
    }
}

/// One region entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionSettings {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_write: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ttl: Option<String>,
    #[serde(default)]
    pub warmup: bool,
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,
}

impl RegionSettings {
    /// Resolve against `defaults` into a validated region config
    pub fn to_config(&self, defaults: &RegionDefaults) -> Result<RegionConfig> {
        let pick = |own: &Option<String>, fallback: &str| -> Result<Duration> {
            parse_duration(own.as_deref().unwrap_or(fallback))
        };

        let config = RegionConfig {
            name: self.name.clone(),
            max_size: self.max_size.unwrap_or(defaults.max_size),
            expire_after_write: pick(&self.expire_after_write, &defaults.expire_after_write)?,
            expire_after_access: pick(&self.expire_after_access, &defaults.expire_after_access)?,
            ttl: pick(&self.ttl, &defaults.ttl)?,
            min_ttl: pick(&self.min_ttl, &defaults.min_ttl)?,
            max_ttl: pick(&self.max_ttl, &defaults.max_ttl)?,
            warmup_enabled: self.warmup,
            eviction_policy: self.eviction_policy,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Adaptive TTL engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptiveSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_adaptive_interval")]
    pub interval: String,
    #[serde(default = "default_low_watermark")]
    pub low_watermark: f64,
    #[serde(default = "default_high_watermark")]
    pub high_watermark: f64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_adaptive_interval(),
            low_watermark: default_low_watermark(),
            high_watermark: default_high_watermark(),
        }
    }
}

impl AdaptiveSettings {
    pub fn to_config(&self) -> Result<AdaptiveConfig> {
        let config = AdaptiveConfig {
            interval: parse_duration(&self.interval)?,
            low_watermark: self.low_watermark,
            high_watermark: self.high_watermark,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Warm-up settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarmupSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Warm the core regions in the background at startup
    #[serde(default = "default_true")]
    pub startup: bool,
    #[serde(default = "default_core_regions")]
    pub core_regions: Vec<String>,
    /// Re-warm the core regions this often; `null` disables it
    #[serde(default = "default_core_refresh")]
    pub core_refresh: Option<String>,
    #[serde(default = "default_jobs")]
    pub jobs: Vec<WarmupJobSettings>,
    /// Static entries per region, served by the built-in seed loader
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub seed: HashMap<String, LoadedEntries>,
}

impl Default for WarmupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            startup: true,
            core_regions: default_core_regions(),
            core_refresh: default_core_refresh(),
            jobs: default_jobs(),
            seed: HashMap::new(),
        }
    }
}

impl WarmupSettings {
    pub fn to_config(&self) -> Result<WarmupConfig> {
        let jobs = self
            .jobs
            .iter()
            .map(|job| {
                Ok(WarmupJob {
                    region: job.region.clone(),
                    interval: parse_duration(&job.interval)?,
                    limit: job.limit,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let core_refresh = self.core_refresh.as_deref().map(parse_duration).transpose()?;

        Ok(WarmupConfig {
            startup: self.startup,
            core_regions: self.core_regions.clone(),
            core_refresh,
            jobs,
        })
    }
}

/// Periodic warm-up job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarmupJobSettings {
    pub region: String,
    pub interval: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Statistics collection and local sweeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsSettings {
    /// How often statistics are published to metrics and logs
    #[serde(default = "default_report_interval")]
    pub report_interval: String,
    /// How often expired local entries are purged
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            report_interval: default_report_interval(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl StatsSettings {
    pub fn report_interval(&self) -> Result<Duration> {
        parse_duration(&self.report_interval)
    }

    pub fn sweep_interval(&self) -> Result<Duration> {
        parse_duration(&self.sweep_interval)
    }
}

/// Which distributed backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process backend; nothing is shared between processes
    #[default]
    Memory,
    /// Redis server (requires the `redis-backend` feature)
    Redis,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Redis => write!(f, "redis"),
        }
    }
}

/// Distributed tier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistributedSettings {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout: String,
}

impl Default for DistributedSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            url: None,
            command_timeout: default_command_timeout(),
        }
    }
}

impl DistributedSettings {
    pub fn command_timeout(&self) -> Result<Duration> {
        parse_duration(&self.command_timeout)
    }
}

// =============================================================================
// Loading & Validation
// =============================================================================

impl CacheSettings {
    /// Read settings from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse and validate settings from YAML text
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let settings: CacheSettings = if raw.trim().is_empty() {
            CacheSettings::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Resolved region configs, in declaration order
    pub fn region_configs(&self) -> Result<Vec<RegionConfig>> {
        if self.regions.is_empty() {
            return Ok(reference_regions());
        }
        self.regions
            .iter()
            .map(|r| r.to_config(&self.defaults))
            .collect()
    }

    /// Build the region catalogue
    pub fn catalog(&self) -> Result<RegionCatalog> {
        RegionCatalog::new(self.region_configs()?)
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(Error::Config("key_prefix must not be empty".into()));
        }

        let catalog = self.catalog()?;
        self.adaptive.to_config()?;
        self.stats.report_interval()?;
        self.stats.sweep_interval()?;
        self.distributed.command_timeout()?;

        if self.distributed.backend == BackendKind::Redis && self.distributed.url.is_none() {
            return Err(Error::Config("distributed.url is required for the redis backend".into()));
        }

        // Core regions and jobs outside the catalogue are skipped at runtime;
        // seed data for an unknown region is always a mistake
        self.warmup.to_config()?;
        for region in self.warmup.seed.keys() {
            if !catalog.contains(region) {
                return Err(Error::Config(format!(
                    "warm-up seed references unknown region {}",
                    region
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a Go-style duration string (e.g. "1h", "30m", "1h30m", "500ms").
///
/// A trailing number without a unit is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total_ms: u64 = 0;
    let mut num_buf = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        num_buf.clear();

        let multiplier = match c {
            'd' | 'D' => 86_400_000,
            'h' | 'H' => 3_600_000,
            'm' | 'M' if matches!(chars.peek(), Some('s' | 'S')) => {
                chars.next();
                1
            }
            'm' | 'M' => 60_000,
            's' | 'S' => 1_000,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    c
                )))
            }
        };

        total_ms = num
            .checked_mul(multiplier)
            .and_then(|v| total_ms.checked_add(v))
            .ok_or_else(|| Error::DurationParse(format!("duration overflows: {}", s)))?;
    }

    // Handle case where string ends with a number (assume seconds)
    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_ms = num
            .checked_mul(1_000)
            .and_then(|v| total_ms.checked_add(v))
            .ok_or_else(|| Error::DurationParse(format!("duration overflows: {}", s)))?;
    }

    if total_ms == 0 {
        return Err(Error::DurationParse(
            "duration must be greater than 0".to_string(),
        ));
    }

    Ok(Duration::from_millis(total_ms))
}

// =============================================================================
// Defaults
// =============================================================================

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

fn default_expire_after_write() -> String {
    "30m".to_string()
}

fn default_expire_after_access() -> String {
    "10m".to_string()
}

fn default_ttl() -> String {
    "1h".to_string()
}

fn default_min_ttl() -> String {
    "5m".to_string()
}

fn default_max_ttl() -> String {
    "24h".to_string()
}

fn default_true() -> bool {
    true
}

fn default_adaptive_interval() -> String {
    "30m".to_string()
}

fn default_low_watermark() -> f64 {
    0.70
}

fn default_high_watermark() -> f64 {
    0.90
}

fn default_core_regions() -> Vec<String> {
    DEFAULT_CORE_REGIONS.iter().map(|s| s.to_string()).collect()
}

fn default_core_refresh() -> Option<String> {
    Some("1h".to_string())
}

fn default_jobs() -> Vec<WarmupJobSettings> {
    vec![
        WarmupJobSettings {
            region: "archives".to_string(),
            interval: "5m".to_string(),
            limit: Some(10),
        },
        WarmupJobSettings {
            region: "statistics".to_string(),
            interval: "2m".to_string(),
            limit: None,
        },
    ]
}

fn default_report_interval() -> String {
    "5m".to_string()
}

fn default_sweep_interval() -> String {
    "5m".to_string()
}

fn default_command_timeout() -> String {
    "2s".to_string()
}
