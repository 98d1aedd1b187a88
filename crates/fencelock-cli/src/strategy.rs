//! Build the configured lock strategy

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::info;

use fencelock_backend::{
    MemoryBackend, MemorySequenceStore, RedisBackend, SequenceStore, StorageBackend,
};
use fencelock_core::{LockStrategy, QuorumLockManager, SequentialLock, StrategyKind};

use crate::settings::Settings;

const MEMORY_SCHEME: &str = "memory://";
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// The strategy selected by configuration
pub enum ActiveStrategy {
    Quorum(Arc<QuorumLockManager>),
    Sequential(Arc<SequentialLock>),
}

impl ActiveStrategy {
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        match settings.strategy {
            StrategyKind::Quorum => {
                let mut backends = Vec::with_capacity(settings.backends.len());
                for endpoint in &settings.backends {
                    backends.push(connect_backend(endpoint).await?);
                }
                let manager = QuorumLockManager::new(backends, (&settings.quorum).into())?;
                Ok(ActiveStrategy::Quorum(Arc::new(manager)))
            }
            StrategyKind::Sequential => {
                // No ordered-node service client ships with this workspace;
                // queues are coordinated in-process
                let store: Arc<dyn SequenceStore> = Arc::new(MemorySequenceStore::default());
                let lock = SequentialLock::connect(store, (&settings.sequential).into()).await?;
                Ok(ActiveStrategy::Sequential(Arc::new(lock)))
            }
        }
    }

    pub fn strategy(&self) -> Arc<dyn LockStrategy> {
        match self {
            ActiveStrategy::Quorum(manager) => manager.clone() as Arc<dyn LockStrategy>,
            ActiveStrategy::Sequential(lock) => lock.clone() as Arc<dyn LockStrategy>,
        }
    }

    /// Close the coordination session, if any
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        if let ActiveStrategy::Sequential(lock) = self {
            lock.close().await?;
        }
        Ok(())
    }
}

/// Connect one storage node from its endpoint URL
pub async fn connect_backend(endpoint: &str) -> anyhow::Result<Arc<dyn StorageBackend>> {
    if let Some(name) = endpoint.strip_prefix(MEMORY_SCHEME) {
        if name.is_empty() {
            bail!("memory backend endpoint needs a name, e.g. memory://node-0");
        }
        let backend = MemoryBackend::new(name).with_cleanup(MEMORY_SWEEP_INTERVAL);
        return Ok(Arc::new(backend));
    }

    if endpoint.starts_with("redis://") || endpoint.starts_with("rediss://") {
        let backend = RedisBackend::connect(endpoint)
            .await
            .with_context(|| {
                format!("failed to connect storage backend {}", backend_label(endpoint))
            })?;
        info!(backend = backend.name(), "Connected storage backend");
        return Ok(Arc::new(backend));
    }

    bail!("unsupported backend endpoint: {}", backend_label(endpoint))
}

/// Endpoint with any credentials removed, for messages
fn backend_label(endpoint: &str) -> &str {
    match endpoint.split_once('@') {
        Some((_, host)) => host,
        None => endpoint,
    }
}
