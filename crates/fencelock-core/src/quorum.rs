//! Quorum Lock Manager
//!
//! Redlock-style acquisition across a fixed set of independent storage nodes:
//! 1. Generate a fresh token and `SetIfAbsentWithTTL` it on every node at once,
//!    each call bounded by its own timeout
//! 2. Held if a majority accepted and `ttl − elapsed − drift` is still positive;
//!    a fencing token is then drawn from the first (canonical) node's counter
//! 3. Otherwise compare-delete the token everywhere it may have landed, back
//!    off with jitter, and retry
//!
//! Release compare-deletes the token on every node, so a late release can
//! never remove a newer holder's key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use fencelock_backend::StorageBackend;
use fencelock_common::{
    BackendError, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_CLOCK_DRIFT_FACTOR, FENCING_KEY_SUFFIX,
    LockError, Result, clock_drift, generate_token, jitter, quorum,
};

use crate::handle::{LockHandle, StrategyKind, Validity};
use crate::metrics::{self, OUTCOME_HELD, OUTCOME_NOT_ACQUIRED};
use crate::strategy::{Acquisition, AcquireRequest, LockStrategy};

/// Tuning of the quorum protocol
#[derive(Debug, Clone, PartialEq)]
pub struct QuorumConfig {
    /// Upper bound on every single backend call
    pub call_timeout: Duration,
    /// Fraction of the TTL reserved for clock drift between nodes
    pub clock_drift_factor: f64,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            clock_drift_factor: DEFAULT_CLOCK_DRIFT_FACTOR,
        }
    }
}

pub struct QuorumLockManager {
    backends: Vec<Arc<dyn StorageBackend>>,
    quorum: usize,
    config: QuorumConfig,
}

impl QuorumLockManager {
    /// Build a manager over a fixed, ordered set of nodes.
    ///
    /// The first node is the canonical fencing counter.
    pub fn new(backends: Vec<Arc<dyn StorageBackend>>, config: QuorumConfig) -> Result<Self> {
        if backends.is_empty() {
            return Err(LockError::ConfigError(
                "at least one storage backend is required".to_string(),
            ));
        }
        if config.call_timeout.is_zero() {
            return Err(LockError::ConfigError(
                "backend call timeout must be greater than zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&config.clock_drift_factor) {
            return Err(LockError::ConfigError(format!(
                "clock drift factor must be in [0, 1), got {}",
                config.clock_drift_factor
            )));
        }

        let quorum = quorum(backends.len());
        info!(
            backends = backends.len(),
            quorum,
            call_timeout_ms = config.call_timeout.as_millis() as u64,
            "Quorum lock manager initialized"
        );

        Ok(Self {
            backends,
            quorum,
            config,
        })
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn config(&self) -> &QuorumConfig {
        &self.config
    }

    /// Offer `token` to every node concurrently
    async fn lock_instances(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Vec<std::result::Result<bool, BackendError>> {
        let limit = self.config.call_timeout;
        join_all(self.backends.iter().map(|backend| {
            bounded(
                backend.as_ref(),
                limit,
                "set_if_absent",
                backend.set_if_absent_with_ttl(resource, token, ttl),
            )
        }))
        .await
    }

    /// Draw the next fencing value from the canonical node, if it answers
    async fn issue_fencing_token(&self, resource: &str) -> Option<i64> {
        let canonical = self.backends.first()?;
        let counter_key = format!("{}{}", resource, FENCING_KEY_SUFFIX);

        match bounded(
            canonical.as_ref(),
            self.config.call_timeout,
            "increment",
            canonical.increment(&counter_key),
        )
        .await
        {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(
                    resource = %resource,
                    backend = canonical.name(),
                    error = %e,
                    "Fencing counter unavailable, lock is protected by its TTL only"
                );
                metrics::record_fencing_unavailable();
                None
            }
        }
    }

    /// Clean up an attempt cut short by the caller's deadline without
    /// keeping the caller waiting
    fn spawn_cleanup(&self, resource: &str, token: String) {
        let backends = self.backends.clone();
        let resource = resource.to_string();
        let limit = self.config.call_timeout;

        tokio::spawn(async move {
            compare_and_delete_all(&backends, &resource, &token, limit).await;
            debug!(resource = %resource, "Cleaned up interrupted attempt");
        });
    }
}

/// Bound one backend call by `limit`, recording failures
async fn bounded<T>(
    backend: &dyn StorageBackend,
    limit: Duration,
    op: &'static str,
    call: impl Future<Output = std::result::Result<T, BackendError>>,
) -> std::result::Result<T, BackendError> {
    let result = match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(backend.name().to_string(), limit)),
    };

    if let Err(e) = &result {
        let name = e.backend().unwrap_or(backend.name());
        debug!(backend = name, op, error = %e, "Backend call failed");
        metrics::record_backend_error(name, op);
    }
    result
}

/// Compare-delete `token` under `resource` on every given node concurrently
async fn compare_and_delete_all<'a>(
    backends: impl IntoIterator<Item = &'a Arc<dyn StorageBackend>>,
    resource: &str,
    token: &str,
    limit: Duration,
) -> Vec<std::result::Result<u64, BackendError>> {
    join_all(backends.into_iter().map(|backend| {
        bounded(
            backend.as_ref(),
            limit,
            "compare_and_delete",
            backend.compare_and_delete(resource, token),
        )
    }))
    .await
}

#[async_trait]
impl LockStrategy for QuorumLockManager {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Quorum
    }

    async fn acquire(&self, request: &AcquireRequest) -> Result<Acquisition> {
        request.validate()?;

        let resource = request.resource.as_str();
        let started = Instant::now();
        // A wait too long to represent means no deadline
        let deadline = request.wait.and_then(|wait| started.checked_add(wait));
        let attempts = request.retry_count.saturating_add(1);
        let drift = clock_drift(request.ttl, self.config.clock_drift_factor);

        for attempt in 1..=attempts {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }

            let token = generate_token();
            let attempt_started = Instant::now();
            let fan_out = self.lock_instances(resource, &token, request.ttl);

            let results = match deadline {
                Some(deadline) => match timeout_at(deadline, fan_out).await {
                    Ok(results) => results,
                    Err(_) => {
                        debug!(
                            resource = %resource,
                            attempt,
                            "Deadline elapsed mid-attempt"
                        );
                        self.spawn_cleanup(resource, token);
                        break;
                    }
                },
                None => fan_out.await,
            };

            let successes = results.iter().filter(|r| matches!(r, Ok(true))).count();
            let elapsed = attempt_started.elapsed();
            let validity = request
                .ttl
                .checked_sub(elapsed)
                .and_then(|remaining| remaining.checked_sub(drift))
                .filter(|remaining| !remaining.is_zero());

            if successes >= self.quorum
                && let Some(validity) = validity
                && let Some(expires_at) = attempt_started.checked_add(elapsed + validity)
            {
                let fencing = self.issue_fencing_token(resource);
                let fencing_token = match deadline {
                    Some(deadline) => match timeout_at(deadline, fencing).await {
                        Ok(fencing_token) => fencing_token,
                        Err(_) => {
                            warn!(
                                resource = %resource,
                                "Deadline elapsed before a fencing token was issued, \
                                 lock is protected by its TTL only"
                            );
                            metrics::record_fencing_unavailable();
                            None
                        }
                    },
                    None => fencing.await,
                };
                let handle = LockHandle::pending(
                    resource,
                    token,
                    fencing_token,
                    Validity::Deadline(expires_at),
                    StrategyKind::Quorum,
                )
                .with_validity_window(validity);
                handle.promote();

                info!(
                    resource = %resource,
                    attempt,
                    successes,
                    fencing_token = ?fencing_token,
                    validity_ms = validity.as_millis() as u64,
                    "Lock acquired"
                );
                metrics::record_acquire(StrategyKind::Quorum, OUTCOME_HELD, started.elapsed());
                return Ok(Acquisition::Held(handle));
            }

            debug!(
                resource = %resource,
                attempt,
                successes,
                quorum = self.quorum,
                elapsed_ms = elapsed.as_millis() as u64,
                "Attempt failed, removing partial acceptances"
            );

            // A call that errored or timed out may still have stored the token
            let touched = self
                .backends
                .iter()
                .zip(&results)
                .filter(|(_, result)| !matches!(result, Ok(false)))
                .map(|(backend, _)| backend);
            let cleanup = compare_and_delete_all(touched, resource, &token, self.config.call_timeout);
            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, cleanup).await.is_err() {
                        debug!(resource = %resource, attempt, "Deadline elapsed during cleanup");
                        self.spawn_cleanup(resource, token);
                        break;
                    }
                }
                None => {
                    cleanup.await;
                }
            }

            if attempt < attempts {
                let mut pause = request
                    .retry_backoff
                    .saturating_add(jitter(request.retry_backoff));
                if let Some(deadline) = deadline {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    pause = pause.min(remaining);
                }
                tokio::time::sleep(pause).await;
            }
        }

        debug!(resource = %resource, attempts, "Lock not acquired");
        metrics::record_acquire(
            StrategyKind::Quorum,
            OUTCOME_NOT_ACQUIRED,
            started.elapsed(),
        );
        Ok(Acquisition::NotAcquired)
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool> {
        if handle.strategy() != StrategyKind::Quorum {
            return Err(LockError::IllegalArgument(format!(
                "handle for '{}' was issued by the {} strategy",
                handle.resource(),
                handle.strategy()
            )));
        }

        handle
            .release_with(move || async move {
                let results = compare_and_delete_all(
                    &self.backends,
                    handle.resource(),
                    handle.token(),
                    self.config.call_timeout,
                )
                .await;

                let mut deleted = 0u64;
                for (backend, result) in self.backends.iter().zip(results) {
                    match result {
                        Ok(count) => deleted += count,
                        Err(e) => warn!(
                            resource = %handle.resource(),
                            backend = backend.name(),
                            error = %e,
                            "Release failed on backend"
                        ),
                    }
                }

                let released = deleted > 0;
                metrics::record_release(StrategyKind::Quorum, released);
                debug!(
                    resource = %handle.resource(),
                    deleted,
                    "Lock released"
                );
                Ok::<_, LockError>(released)
            })
            .await
    }
}
