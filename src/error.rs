//! Error types for the tiered cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the cache subsystem.
///
/// None of these reach callers of [`crate::cache::CacheFacade`]'s data-path
/// methods: distributed-tier failures are logged and degraded to local-only
/// behaviour. They surface from construction, configuration and the backend
/// traits so that the facade can decide what to swallow.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML configuration could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// Region is not part of the configured catalogue
    #[error("Unknown cache region: {0}")]
    UnknownRegion(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Distributed backend failure
    #[error("{backend} {operation} failed: {reason}")]
    Backend {
        backend: &'static str,
        operation: &'static str,
        reason: String,
    },

    /// Distributed backend did not answer in time
    #[error("{backend} {operation} timed out after {millis}ms")]
    Timeout {
        backend: &'static str,
        operation: &'static str,
        millis: u64,
    },

    /// A region could not be warmed
    #[error("Warm-up of region {region} failed: {reason}")]
    Warmup { region: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a backend error
    pub fn backend(backend: &'static str, operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            operation,
            reason: reason.into(),
        }
    }

    /// True if the error came from the distributed tier
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Timeout { .. })
    }
}
