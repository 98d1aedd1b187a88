//! Ordered-node coordination primitive
//!
//! A `SequenceStore` hands out session-bound, per-queue strictly increasing
//! markers, in the manner of ZooKeeper ephemeral sequential znodes:
//! - a marker lives only as long as the session that created it
//! - sequence numbers within one queue are never reused
//! - `children` lists the live markers of a queue in ascending order

mod memory;

pub use memory::MemorySequenceStore;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use fencelock_common::{BackendError, MARKER_PREFIX};

/// Identifier of a coordination session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// An ephemeral sequential marker created under a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub queue: String,
    pub sequence: u64,
    pub session: SessionId,
}

impl Marker {
    /// Full marker path, e.g. `/locks/orders/lock-0000000007`
    pub fn path(&self) -> String {
        format!("{}/{}{:010}", self.queue, MARKER_PREFIX, self.sequence)
    }
}

#[async_trait]
pub trait SequenceStore: Send + Sync {
    fn name(&self) -> &str;

    /// Open a session that expires unless renewed within `ttl`
    async fn create_session(&self, ttl: Duration) -> Result<SessionId, BackendError>;

    /// Extend a session's lifetime. Returns `false` if it already expired.
    async fn renew_session(&self, session: SessionId) -> Result<bool, BackendError>;

    /// End a session, removing every marker it owns
    async fn close_session(&self, session: SessionId) -> Result<(), BackendError>;

    /// Create a new marker under `queue` owned by `session`
    async fn create_sequential(
        &self,
        queue: &str,
        session: SessionId,
    ) -> Result<Marker, BackendError>;

    /// Sequence numbers of the live markers under `queue`, ascending
    async fn children(&self, queue: &str) -> Result<Vec<u64>, BackendError>;

    /// Delete one marker. Returns `true` if it existed.
    async fn delete(&self, queue: &str, sequence: u64) -> Result<bool, BackendError>;

    /// Wait until the markers of `queue` may have changed, or `timeout` elapses.
    ///
    /// The default simply sleeps, which turns callers into pollers. Stores
    /// that can push change notifications override it.
    async fn wait_for_change(&self, queue: &str, timeout: Duration) {
        let _ = queue;
        tokio::time::sleep(timeout).await;
    }
}
