//! Sequential-Queue lock strategy
//!
//! Built on an ordered-node coordination service instead of independent TTL
//! stores. Each acquisition creates an ephemeral sequential marker under
//! `<base_path>/<resource>`; the caller holds the lock once its marker is the
//! lowest live one. The marker's sequence number is the fencing token.
//!
//! Resource names are opaque: anything that is not already a plain path
//! segment is percent-encoded, so `users/42` queues under `users%2F42`.
//!
//! Validity is the lifetime of the coordination session, kept alive by a
//! background task renewing it every third of its TTL. Every handle issued
//! through one `SequentialLock` shares that session's liveness.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tracing::{debug, info, warn};

use fencelock_backend::{Marker, SequenceStore, SessionId};
use fencelock_common::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUEUE_BASE_PATH, DEFAULT_SESSION_TTL_MS, LockError,
    Result, encode_path_segment,
};

use crate::handle::{LockHandle, SessionLiveness, StrategyKind, Validity};
use crate::metrics::{self, OUTCOME_ERROR, OUTCOME_HELD, OUTCOME_NOT_ACQUIRED};
use crate::strategy::{Acquisition, AcquireRequest, LockStrategy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequentialConfig {
    /// Root under which one queue per resource is created
    pub base_path: String,
    /// Coordination session time-to-live
    pub session_ttl: Duration,
    /// Upper bound between ownership checks while queued
    pub poll_interval: Duration,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_QUEUE_BASE_PATH.to_string(),
            session_ttl: Duration::from_millis(DEFAULT_SESSION_TTL_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

pub struct SequentialLock {
    store: Arc<dyn SequenceStore>,
    liveness: SessionLiveness,
    config: SequentialConfig,
    keepalive: JoinHandle<()>,
}

impl SequentialLock {
    /// Open a coordination session and start keeping it alive.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn connect(store: Arc<dyn SequenceStore>, config: SequentialConfig) -> Result<Self> {
        if !config.base_path.starts_with('/') {
            return Err(LockError::ConfigError(format!(
                "queue base path must be absolute, got '{}'",
                config.base_path
            )));
        }
        if config.session_ttl.is_zero() || config.poll_interval.is_zero() {
            return Err(LockError::ConfigError(
                "session ttl and poll interval must be greater than zero".to_string(),
            ));
        }

        let session = store.create_session(config.session_ttl).await?;
        let liveness = SessionLiveness::new(session);
        let keepalive = tokio::spawn(keep_alive(
            store.clone(),
            liveness.clone(),
            config.session_ttl,
        ));

        info!(
            store = store.name(),
            session = %session,
            session_ttl_ms = config.session_ttl.as_millis() as u64,
            "Sequential lock session opened"
        );

        Ok(Self {
            store,
            liveness,
            config,
            keepalive,
        })
    }

    pub fn session(&self) -> SessionId {
        self.liveness.session()
    }

    /// Whether the coordination session is still believed alive
    pub fn is_connected(&self) -> bool {
        self.liveness.is_alive()
    }

    pub fn config(&self) -> &SequentialConfig {
        &self.config
    }

    /// End the session. Every marker it owns disappears and every handle
    /// issued through this strategy stops reporting `Held`.
    pub async fn close(&self) -> Result<()> {
        self.keepalive.abort();
        self.liveness.mark_lost();
        self.store.close_session(self.session()).await?;
        info!(session = %self.session(), "Sequential lock session closed");
        Ok(())
    }

    fn queue_path(&self, resource: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_path.trim_end_matches('/'),
            encode_path_segment(resource)
        )
    }

    /// Best-effort removal of a marker that will not become the owner
    async fn abandon(&self, marker: &Marker) {
        if let Err(e) = self.store.delete(&marker.queue, marker.sequence).await {
            warn!(marker = %marker.path(), error = %e, "Failed to remove abandoned marker");
        }
    }
}

impl Drop for SequentialLock {
    fn drop(&mut self) {
        // The session is left to expire on its own, as if the process died
        self.keepalive.abort();
    }
}

/// Renew the session every third of its TTL until renewal is refused or
/// has failed for longer than the TTL itself
async fn keep_alive(store: Arc<dyn SequenceStore>, liveness: SessionLiveness, ttl: Duration) {
    let period = (ttl / 3).max(Duration::from_millis(1));
    let mut ticker = interval(period);
    ticker.tick().await;
    let mut last_renewed = Instant::now();

    loop {
        ticker.tick().await;
        match store.renew_session(liveness.session()).await {
            Ok(true) => last_renewed = Instant::now(),
            Ok(false) => {
                warn!(session = %liveness.session(), "Coordination session expired");
                liveness.mark_lost();
                break;
            }
            Err(e) => {
                warn!(session = %liveness.session(), error = %e, "Session renewal failed");
                if last_renewed.elapsed() >= ttl {
                    liveness.mark_lost();
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl LockStrategy for SequentialLock {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sequential
    }

    async fn acquire(&self, request: &AcquireRequest) -> Result<Acquisition> {
        request.validate()?;
        if !self.liveness.is_alive() {
            return Err(LockError::SessionLost(self.session().0));
        }

        let started = Instant::now();
        let wait = request.wait.unwrap_or_else(|| {
            request
                .retry_backoff
                .saturating_mul(request.retry_count.saturating_add(1))
        });
        // A wait too long to represent means no deadline
        let deadline = started.checked_add(wait);
        let queue = self.queue_path(&request.resource);

        let marker = match self.store.create_sequential(&queue, self.session()).await {
            Ok(marker) => marker,
            Err(e) => {
                metrics::record_acquire(StrategyKind::Sequential, OUTCOME_ERROR, started.elapsed());
                return Err(e.into());
            }
        };
        debug!(marker = %marker.path(), "Queued for lock");

        loop {
            let children = match self.store.children(&queue).await {
                Ok(children) => children,
                Err(e) => {
                    self.abandon(&marker).await;
                    metrics::record_acquire(
                        StrategyKind::Sequential,
                        OUTCOME_ERROR,
                        started.elapsed(),
                    );
                    return Err(e.into());
                }
            };

            if children.first() == Some(&marker.sequence) {
                let handle = LockHandle::pending(
                    request.resource.as_str(),
                    marker.path(),
                    Some(marker.sequence as i64),
                    Validity::Session(self.liveness.clone()),
                    StrategyKind::Sequential,
                )
                .with_marker(marker);
                handle.promote();

                info!(
                    resource = %request.resource,
                    fencing_token = ?handle.fencing_token(),
                    "Lock acquired"
                );
                metrics::record_acquire(StrategyKind::Sequential, OUTCOME_HELD, started.elapsed());
                return Ok(Acquisition::Held(handle));
            }

            if !children.contains(&marker.sequence) {
                warn!(marker = %marker.path(), "Queued marker vanished before ownership");
                metrics::record_acquire(
                    StrategyKind::Sequential,
                    OUTCOME_NOT_ACQUIRED,
                    started.elapsed(),
                );
                return Ok(Acquisition::NotAcquired);
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                self.abandon(&marker).await;
                debug!(marker = %marker.path(), "Timed out waiting in queue");
                metrics::record_acquire(
                    StrategyKind::Sequential,
                    OUTCOME_NOT_ACQUIRED,
                    started.elapsed(),
                );
                return Ok(Acquisition::NotAcquired);
            }

            let pause = match deadline {
                Some(deadline) => self.config.poll_interval.min(deadline - now),
                None => self.config.poll_interval,
            };
            self.store.wait_for_change(&queue, pause).await;
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool> {
        let marker = match (handle.strategy(), handle.marker()) {
            (StrategyKind::Sequential, Some(marker)) => marker,
            _ => {
                return Err(LockError::IllegalArgument(format!(
                    "handle for '{}' was not issued by the sequential strategy",
                    handle.resource()
                )));
            }
        };

        handle
            .release_with(move || async move {
                let deleted = self.store.delete(&marker.queue, marker.sequence).await?;
                metrics::record_release(StrategyKind::Sequential, deleted);
                debug!(marker = %marker.path(), deleted, "Lock released");
                Ok::<_, LockError>(deleted)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fencelock_backend::MemorySequenceStore;

    #[tokio::test]
    async fn test_connect_validates_config() {
        let store: Arc<dyn SequenceStore> = Arc::new(MemorySequenceStore::default());

        let config = SequentialConfig {
            base_path: "locks".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            SequentialLock::connect(store.clone(), config).await,
            Err(LockError::ConfigError(_))
        ));

        let config = SequentialConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(SequentialLock::connect(store, config).await.is_err());
    }

    #[tokio::test]
    async fn test_queue_path() {
        let store: Arc<dyn SequenceStore> = Arc::new(MemorySequenceStore::default());
        let config = SequentialConfig {
            base_path: "/locks/".to_string(),
            ..Default::default()
        };
        let lock = SequentialLock::connect(store, config).await.unwrap();
        assert_eq!(lock.queue_path("orders"), "/locks/orders");
        assert_eq!(lock.queue_path("users/42 counter"), "/locks/users%2F42%20counter");
        assert_eq!(lock.queue_path(".."), "/locks/%2E%2E");
    }

    #[tokio::test]
    async fn test_empty_resource_rejected() {
        let store: Arc<dyn SequenceStore> = Arc::new(MemorySequenceStore::default());
        let lock = SequentialLock::connect(store, SequentialConfig::default())
            .await
            .unwrap();

        let result = lock.acquire(&AcquireRequest::new("")).await;
        assert!(matches!(result, Err(LockError::IllegalArgument(_))));
    }
}
