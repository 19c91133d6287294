//! Redis-backed distributed tier.
//!
//! Uses a [`ConnectionManager`] so a dropped connection is re-established on
//! the next command. Every command is bounded by a timeout; a slow or
//! unreachable server surfaces as [`Error::Timeout`] and the facade fails
//! open.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use tracing::{debug, info};

use super::distributed::{BackendCounters, BackendStats, DistributedBackend};
use crate::error::{Error, Result};

/// Keys fetched per SCAN round trip
const SCAN_COUNT: usize = 500;

/// Redis backend
pub struct RedisBackend {
    conn: ConnectionManager,
    command_timeout: Duration,
    counters: BackendCounters,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl RedisBackend {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str, command_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid redis url {}: {}", url, e)))?;

        let conn = tokio::time::timeout(command_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| Error::Timeout {
                backend: "redis",
                operation: "connect",
                millis: command_timeout.as_millis() as u64,
            })?
            .map_err(|e| Error::backend("redis", "connect", e.to_string()))?;

        info!("Connected to redis (command timeout {:?})", command_timeout);

        Ok(Self {
            conn,
            command_timeout,
            counters: BackendCounters::default(),
        })
    }

    async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let result = match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::backend("redis", operation, e.to_string())),
            Err(_) => Err(Error::Timeout {
                backend: "redis",
                operation,
                millis: self.command_timeout.as_millis() as u64,
            }),
        };

        if result.is_err() {
            self.counters.error();
        }
        result
    }
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl DistributedBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.counters.read();
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = self.run("get", conn.get(key)).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.counters.write();
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        self.run("set", conn.set_ex::<_, _, ()>(key, value.as_ref(), secs))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.counters.delete();
        let mut conn = self.conn.clone();
        let removed: i64 = self.run("delete", conn.del(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.counters.delete();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT);
            let (next, keys): (u64, Vec<String>) =
                self.run("scan", scan.query_async(&mut conn)).await?;

            if !keys.is_empty() {
                let n: i64 = self.run("delete", conn.del(&keys)).await?;
                removed += n.max(0) as u64;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix, removed, "Cleared redis keys by prefix");
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.counters.write();
        let mut conn = self.conn.clone();
        if ttl.is_zero() {
            let removed: i64 = self.run("expire", conn.del(key)).await?;
            return Ok(removed > 0);
        }
        let secs = ttl.as_secs().max(1) as i64;
        self.run("expire", conn.expire(key, secs)).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.counters.read();
        let mut conn = self.conn.clone();
        // -2 for a missing key, -1 for a key without expiry
        let secs: i64 = self.run("ttl", conn.ttl(key)).await?;
        Ok(u64::try_from(secs).ok().map(Duration::from_secs))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = self
            .run("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        self.counters.snapshot()
    }
}
