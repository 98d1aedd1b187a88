// In-memory ordered-node coordination service
// Sessions expire lazily by TTL; expired or closed sessions take their markers with them

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use fencelock_common::BackendError;

use super::{Marker, SequenceStore, SessionId};

struct SessionEntry {
    ttl: Duration,
    last_renewed: Instant,
}

impl SessionEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_renewed) > self.ttl
    }
}

/// Markers of one queue. `next_sequence` survives the queue emptying.
#[derive(Default)]
struct Queue {
    next_sequence: u64,
    markers: BTreeMap<u64, SessionId>,
}

pub struct MemorySequenceStore {
    name: String,
    sessions: DashMap<SessionId, SessionEntry>,
    queues: DashMap<String, Queue>,
    watchers: DashMap<String, Arc<Notify>>,
    next_session: AtomicU64,
    available: AtomicBool,
}

impl Default for MemorySequenceStore {
    fn default() -> Self {
        Self::new("memory-coordinator")
    }
}

impl MemorySequenceStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sessions: DashMap::new(),
            queues: DashMap::new(),
            watchers: DashMap::new(),
            next_session: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the coordination service going down (`false`) or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Force a session to expire as if its owner stopped heartbeating
    pub fn expire_session(&self, session: SessionId) {
        if self.sessions.remove(&session).is_some() {
            debug!(session = %session, "Session force-expired");
        }
        self.remove_markers_of(session);
    }

    /// Whether `session` exists and has not outlived its TTL
    pub fn is_session_alive(&self, session: SessionId) -> bool {
        let now = Instant::now();
        self.sessions
            .get(&session)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable(
                self.name.clone(),
                "coordination service is down".to_string(),
            ))
        }
    }

    fn notify(&self, queue: &str) {
        if let Some(notify) = self.watchers.get(queue) {
            notify.notify_waiters();
        }
    }

    fn remove_markers_of(&self, session: SessionId) {
        let mut changed = Vec::new();
        for mut queue in self.queues.iter_mut() {
            let before = queue.markers.len();
            queue.markers.retain(|_, owner| *owner != session);
            if queue.markers.len() != before {
                changed.push(queue.key().clone());
            }
        }
        for queue in changed {
            self.notify(&queue);
        }
    }
}

#[async_trait]
impl SequenceStore for MemorySequenceStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_session(&self, ttl: Duration) -> Result<SessionId, BackendError> {
        self.check_available()?;

        let session = SessionId(self.next_session.fetch_add(1, Ordering::SeqCst));
        self.sessions.insert(
            session,
            SessionEntry {
                ttl,
                last_renewed: Instant::now(),
            },
        );
        debug!(session = %session, ttl_ms = ttl.as_millis() as u64, "Session created");
        Ok(session)
    }

    async fn renew_session(&self, session: SessionId) -> Result<bool, BackendError> {
        self.check_available()?;

        let now = Instant::now();
        let renewed = match self.sessions.get_mut(&session) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.last_renewed = now;
                true
            }
            _ => false,
        };

        if !renewed {
            self.sessions.remove(&session);
            self.remove_markers_of(session);
        }
        Ok(renewed)
    }

    async fn close_session(&self, session: SessionId) -> Result<(), BackendError> {
        self.check_available()?;

        self.sessions.remove(&session);
        self.remove_markers_of(session);
        debug!(session = %session, "Session closed");
        Ok(())
    }

    async fn create_sequential(
        &self,
        queue: &str,
        session: SessionId,
    ) -> Result<Marker, BackendError> {
        self.check_available()?;

        if !self.is_session_alive(session) {
            return Err(BackendError::SessionExpired(session.0));
        }

        let mut entry = self.queues.entry(queue.to_string()).or_default();
        entry.next_sequence += 1;
        let sequence = entry.next_sequence;
        entry.markers.insert(sequence, session);

        Ok(Marker {
            queue: queue.to_string(),
            sequence,
            session,
        })
    }

    async fn children(&self, queue: &str) -> Result<Vec<u64>, BackendError> {
        self.check_available()?;

        let owners: Vec<(u64, SessionId)> = match self.queues.get(queue) {
            Some(entry) => entry
                .markers
                .iter()
                .map(|(sequence, owner)| (*sequence, *owner))
                .collect(),
            None => return Ok(Vec::new()),
        };

        // Ephemeral markers of dead sessions are invisible, and purged on the way
        let (live, dead): (Vec<_>, Vec<_>) = owners
            .into_iter()
            .partition(|(_, owner)| self.is_session_alive(*owner));

        if !dead.is_empty() {
            if let Some(mut entry) = self.queues.get_mut(queue) {
                for (sequence, _) in &dead {
                    entry.markers.remove(sequence);
                }
            }
            self.notify(queue);
        }

        Ok(live.into_iter().map(|(sequence, _)| sequence).collect())
    }

    async fn delete(&self, queue: &str, sequence: u64) -> Result<bool, BackendError> {
        self.check_available()?;

        let removed = self
            .queues
            .get_mut(queue)
            .map(|mut entry| entry.markers.remove(&sequence).is_some())
            .unwrap_or(false);

        if removed {
            self.notify(queue);
        }
        Ok(removed)
    }

    async fn wait_for_change(&self, queue: &str, timeout: Duration) {
        let notify = self
            .watchers
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        let _ = tokio::time::timeout(timeout, notify.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_sequences_strictly_increase() {
        let store = MemorySequenceStore::default();
        let session = store.create_session(TTL).await.unwrap();

        let a = store.create_sequential("/locks/r", session).await.unwrap();
        let b = store.create_sequential("/locks/r", session).await.unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);

        // Deleting does not let a sequence number be reused
        assert!(store.delete("/locks/r", b.sequence).await.unwrap());
        assert!(store.delete("/locks/r", a.sequence).await.unwrap());
        let c = store.create_sequential("/locks/r", session).await.unwrap();
        assert_eq!(c.sequence, 3);
    }

    #[tokio::test]
    async fn test_children_sorted() {
        let store = MemorySequenceStore::default();
        let s1 = store.create_session(TTL).await.unwrap();
        let s2 = store.create_session(TTL).await.unwrap();

        store.create_sequential("/locks/r", s1).await.unwrap();
        store.create_sequential("/locks/r", s2).await.unwrap();
        store.create_sequential("/locks/other", s2).await.unwrap();

        assert_eq!(store.children("/locks/r").await.unwrap(), vec![1, 2]);
        assert_eq!(store.children("/locks/other").await.unwrap(), vec![1]);
        assert!(store.children("/locks/none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_session_removes_its_markers() {
        let store = MemorySequenceStore::default();
        let s1 = store.create_session(TTL).await.unwrap();
        let s2 = store.create_session(TTL).await.unwrap();

        store.create_sequential("/locks/r", s1).await.unwrap();
        store.create_sequential("/locks/r", s2).await.unwrap();

        store.close_session(s1).await.unwrap();
        assert_eq!(store.children("/locks/r").await.unwrap(), vec![2]);
        assert!(!store.is_session_alive(s1));
    }

    #[tokio::test]
    async fn test_expired_session_markers_disappear() {
        let store = MemorySequenceStore::default();
        let session = store
            .create_session(Duration::from_millis(10))
            .await
            .unwrap();
        store.create_sequential("/locks/r", session).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.children("/locks/r").await.unwrap().is_empty());
        assert!(!store.renew_session(session).await.unwrap());
        assert!(matches!(
            store.create_sequential("/locks/r", session).await,
            Err(BackendError::SessionExpired(_))
        ));
    }

    #[tokio::test]
    async fn test_renew_keeps_session_alive() {
        let store = MemorySequenceStore::default();
        let session = store
            .create_session(Duration::from_millis(40))
            .await
            .unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            assert!(store.renew_session(session).await.unwrap());
        }
        assert!(store.is_session_alive(session));
    }

    #[tokio::test]
    async fn test_wait_for_change_wakes_on_delete() {
        let store = Arc::new(MemorySequenceStore::default());
        let session = store.create_session(TTL).await.unwrap();
        let marker = store.create_sequential("/locks/r", session).await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                store
                    .wait_for_change("/locks/r", Duration::from_secs(5))
                    .await;
                start.elapsed()
            })
        };

        // Give the waiter time to register
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.delete("/locks/r", marker.sequence).await.unwrap();

        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemorySequenceStore::default();
        store.set_available(false);
        assert!(matches!(
            store.create_session(TTL).await,
            Err(BackendError::Unavailable(_, _))
        ));
    }
}
