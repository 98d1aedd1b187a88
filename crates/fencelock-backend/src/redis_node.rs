//! Redis storage node
//!
//! Maps the storage primitives onto Redis commands:
//! - `SetIfAbsentWithTTL` → `SET key value NX PX ttl`
//! - `CompareAndDelete` → server-side Lua script (single round trip, atomic)
//! - `Increment` → `INCR`
//!
//! One multiplexed connection is opened per node and cloned for every call,
//! so concurrent lock attempts share it safely.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Script};
use tracing::info;

use fencelock_common::{BackendError, MAX_TTL_MS};

use crate::StorageBackend;

const COMPARE_AND_DELETE_SCRIPT: &str = "if redis.call('get',KEYS[1]) == ARGV[1] then \
     return redis.call('del',KEYS[1]) else return 0 end";

pub struct RedisBackend {
    name: String,
    connection: MultiplexedConnection,
    compare_and_delete: Script,
}

impl RedisBackend {
    /// Open a long-lived connection to the Redis node at `url`
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let name = redact_url(url);
        let client = redis::Client::open(url)
            .map_err(|e| BackendError::Protocol(name.clone(), e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BackendError::Unavailable(name.clone(), e.to_string()))?;

        info!(backend = %name, "Connected to Redis node");

        Ok(Self {
            name,
            connection,
            compare_and_delete: Script::new(COMPARE_AND_DELETE_SCRIPT),
        })
    }

    fn map_error(&self, e: RedisError) -> BackendError {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            BackendError::Unavailable(self.name.clone(), e.to_string())
        } else if e.is_timeout() {
            BackendError::Timeout(self.name.clone(), Duration::ZERO)
        } else {
            BackendError::Protocol(self.name.clone(), e.to_string())
        }
    }
}

/// `PX` argument for `ttl`, refusing values Redis cannot represent
fn ttl_millis(backend: &str, ttl: Duration) -> Result<u64, BackendError> {
    u64::try_from(ttl.as_millis())
        .ok()
        .filter(|millis| *millis <= MAX_TTL_MS)
        .ok_or_else(|| {
            BackendError::Protocol(backend.to_string(), format!("ttl {:?} out of range", ttl))
        })
}

/// Strip credentials from a connection URL so it can be logged
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}{}", &url[..scheme_end + 3], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl StorageBackend for RedisBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        let ttl_ms = ttl_millis(&self.name, ttl)?;
        let mut connection = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut connection)
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<u64, BackendError> {
        let mut connection = self.connection.clone();
        let deleted: u64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut connection)
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(deleted)
    }

    async fn increment(&self, counter_key: &str) -> Result<i64, BackendError> {
        let mut connection = self.connection.clone();
        let value: i64 = redis::cmd("INCR")
            .arg(counter_key)
            .query_async(&mut connection)
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(value)
    }
}
