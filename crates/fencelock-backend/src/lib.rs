//! Fencelock Backend - storage primitives the lock strategies are built on
//!
//! This crate provides:
//! - The `StorageBackend` capability: the three atomic operations every
//!   TTL key-value node must expose to take part in quorum locking
//! - `MemoryBackend`: an in-process node with fault injection
//! - `RedisBackend`: a Redis node over one long-lived multiplexed connection
//! - The `SequenceStore` ordered-node primitive (sessions + ephemeral
//!   sequential markers) and its in-memory implementation

use std::time::Duration;

use async_trait::async_trait;

use fencelock_common::BackendError;

pub mod memory;
pub mod redis_node;
pub mod sequence;

pub use memory::MemoryBackend;
pub use redis_node::RedisBackend;
pub use sequence::{Marker, MemorySequenceStore, SequenceStore, SessionId};

/// Atomic primitives a storage node must implement.
///
/// Every method is a single round trip and atomic at the node. Callers bound
/// each call with their own timeout; implementations need not.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Human-readable node name used in logs and errors
    fn name(&self) -> &str;

    /// Store `value` under `key` with expiry `ttl`, only if `key` is absent.
    ///
    /// Returns `true` if the value was stored.
    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, BackendError>;

    /// Delete `key` only if its current value equals `expected`.
    ///
    /// Returns the number of keys actually deleted (0 or 1).
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<u64, BackendError>;

    /// Atomically increment the counter stored at `counter_key` and return the new value.
    async fn increment(&self, counter_key: &str) -> Result<i64, BackendError>;
}
