//! The Acquire/Release contract shared by every locking strategy

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use fencelock_common::{
    DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS, DEFAULT_TTL_MS, LockError, MAX_TTL_MS, Result,
};

use crate::handle::{LockHandle, StrategyKind};

/// Parameters of one `acquire` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    /// Name of the mutually-exclusive critical section
    pub resource: String,
    /// Lock time-to-live on each storage node
    pub ttl: Duration,
    /// Retries after the first attempt
    pub retry_count: u32,
    /// Base delay between attempts; random jitter of up to the same amount is added
    pub retry_backoff: Duration,
    /// Overall deadline spanning every attempt; one too far in the future
    /// to represent means no deadline
    pub wait: Option<Duration>,
}

impl AcquireRequest {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ttl: Duration::from_millis(DEFAULT_TTL_MS),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            wait: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry_count: u32, retry_backoff: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.resource.is_empty() {
            return Err(LockError::IllegalArgument(
                "resource must not be empty".to_string(),
            ));
        }
        if self.ttl.is_zero() {
            return Err(LockError::IllegalArgument(
                "ttl must be greater than zero".to_string(),
            ));
        }
        if self.ttl.as_millis() > u128::from(MAX_TTL_MS) {
            return Err(LockError::IllegalArgument(format!(
                "ttl must not exceed {} ms",
                MAX_TTL_MS
            )));
        }
        Ok(())
    }
}

/// Outcome of an acquisition. Losing the race is not an error.
#[derive(Debug)]
pub enum Acquisition {
    Held(LockHandle),
    NotAcquired,
}

impl Acquisition {
    pub fn is_held(&self) -> bool {
        matches!(self, Acquisition::Held(_))
    }

    pub fn into_handle(self) -> Option<LockHandle> {
        match self {
            Acquisition::Held(handle) => Some(handle),
            Acquisition::NotAcquired => None,
        }
    }
}

/// A distributed locking algorithm
///
/// Callers depend on this trait only; which strategy is active is a
/// deployment decision.
#[async_trait]
pub trait LockStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Try to take the lock on `request.resource`
    async fn acquire(&self, request: &AcquireRequest) -> Result<Acquisition>;

    /// Give up a handle.
    ///
    /// Returns `true` if the lock was actually removed from at least one
    /// node. Releasing an already released or expired handle is a safe
    /// no-op that returns `false`.
    async fn release(&self, handle: &LockHandle) -> Result<bool>;
}

/// Acquire the lock, run `critical_section`, and release afterwards.
///
/// Returns `Ok(None)` when the lock could not be acquired. A failed release is
/// logged; the lock then lapses on its own.
pub async fn run_locked<S, F, Fut, T>(
    strategy: &S,
    request: &AcquireRequest,
    critical_section: F,
) -> Result<Option<T>>
where
    S: LockStrategy + ?Sized,
    F: FnOnce(Arc<LockHandle>) -> Fut,
    Fut: Future<Output = T>,
{
    let handle = match strategy.acquire(request).await? {
        Acquisition::Held(handle) => Arc::new(handle),
        Acquisition::NotAcquired => return Ok(None),
    };

    let output = critical_section(handle.clone()).await;

    match strategy.release(&handle).await {
        Ok(true) => {}
        Ok(false) => warn!(
            resource = %request.resource,
            "Lock was already gone when the critical section finished"
        ),
        Err(e) => warn!(resource = %request.resource, error = %e, "Failed to release lock"),
    }

    Ok(Some(output))
}
