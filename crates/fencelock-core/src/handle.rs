//! Lock handle returned to callers on a successful acquisition

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use fencelock_backend::{Marker, SessionId};
use fencelock_common::Result;

/// Lock handle state
///
/// `Pending → Held → Released | Expired`. A handle never leaves `Released`
/// or `Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// Quorum or queue ordering not yet confirmed
    Pending,
    /// Owned by the caller
    Held,
    /// Explicitly released
    Released,
    /// Validity deadline passed or coordination session lost
    Expired,
}

/// Which locking algorithm issued a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Quorum,
    Sequential,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Quorum => "quorum",
            StrategyKind::Sequential => "sequential",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quorum" | "redlock" => Ok(StrategyKind::Quorum),
            "sequential" | "queue" => Ok(StrategyKind::Sequential),
            _ => Err(format!("unknown lock strategy: {}", s)),
        }
    }
}

/// Liveness of a coordination session, shared by its keep-alive task and
/// every handle issued under it
#[derive(Debug, Clone)]
pub struct SessionLiveness {
    session: SessionId,
    alive: Arc<AtomicBool>,
}

impl SessionLiveness {
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn mark_lost(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// What bounds a handle's validity
#[derive(Debug, Clone)]
pub enum Validity {
    /// Valid until an absolute deadline (quorum strategy)
    Deadline(Instant),
    /// Valid while the owning session is alive (sequential strategy)
    Session(SessionLiveness),
}

impl Validity {
    fn is_current(&self) -> bool {
        match self {
            Validity::Deadline(deadline) => Instant::now() < *deadline,
            Validity::Session(liveness) => liveness.is_alive(),
        }
    }
}

/// Proof of a successful acquisition.
///
/// Owned by the caller that acquired it. The state field is internally
/// synchronized, so a handle may be shared across threads of one process
/// (e.g. behind an `Arc`); concurrent releases are serialized.
#[derive(Debug)]
pub struct LockHandle {
    resource: String,
    token: String,
    fencing_token: Option<i64>,
    validity: Validity,
    validity_window: Option<Duration>,
    strategy: StrategyKind,
    marker: Option<Marker>,
    state: Mutex<LockState>,
    release_gate: tokio::sync::Mutex<()>,
}

impl LockHandle {
    pub(crate) fn pending(
        resource: impl Into<String>,
        token: impl Into<String>,
        fencing_token: Option<i64>,
        validity: Validity,
        strategy: StrategyKind,
    ) -> Self {
        Self {
            resource: resource.into(),
            token: token.into(),
            fencing_token,
            validity,
            validity_window: None,
            strategy,
            marker: None,
            state: Mutex::new(LockState::Pending),
            release_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Record the validity computed when quorum was confirmed
    pub(crate) fn with_validity_window(mut self, window: Duration) -> Self {
        self.validity_window = Some(window);
        self
    }

    pub(crate) fn with_marker(mut self, marker: Marker) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Confirm ownership: `Pending → Held`
    pub(crate) fn promote(&self) {
        let mut state = self.state.lock();
        if *state == LockState::Pending {
            *state = LockState::Held;
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Ownership token presented on release
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Fencing token to present to the protected resource.
    ///
    /// `None` means the counter backend was unreachable at acquisition time
    /// and the lock is protected by its validity window only.
    pub fn fencing_token(&self) -> Option<i64> {
        self.fencing_token
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub(crate) fn marker(&self) -> Option<&Marker> {
        self.marker.as_ref()
    }

    /// Absolute validity deadline, for deadline-bounded handles
    pub fn deadline(&self) -> Option<Instant> {
        match &self.validity {
            Validity::Deadline(deadline) => Some(*deadline),
            Validity::Session(_) => None,
        }
    }

    /// Remaining validity computed at acquisition (ttl − elapsed − drift)
    pub fn validity(&self) -> Option<Duration> {
        self.validity_window
    }

    /// Validity left right now, for deadline-bounded handles
    pub fn remaining_validity(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Current state. A held handle whose validity lapsed is moved to `Expired` here.
    pub fn state(&self) -> LockState {
        let mut state = self.state.lock();
        if *state == LockState::Held && !self.validity.is_current() {
            *state = LockState::Expired;
        }
        *state
    }

    /// Whether the caller may still enter its critical section.
    ///
    /// Checks local state and validity only; never contacts a backend.
    pub fn is_held(&self) -> bool {
        self.state() == LockState::Held
    }

    /// Run a strategy's release operation with concurrent releases of this
    /// handle serialized. A `Held` handle moves to `Released` on success.
    pub(crate) async fn release_with<F, Fut>(&self, release: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let _gate = self.release_gate.lock().await;
        let before = self.state();
        let released = release().await?;

        if matches!(before, LockState::Held | LockState::Pending) {
            *self.state.lock() = LockState::Released;
        }
        Ok(released)
    }

    /// Serializable view of the handle, without the ownership token
    pub fn snapshot(&self) -> HandleSnapshot {
        HandleSnapshot {
            resource: self.resource.clone(),
            strategy: self.strategy,
            state: self.state(),
            fencing_token: self.fencing_token,
            remaining_validity_ms: self
                .remaining_validity()
                .map(|remaining| remaining.as_millis() as u64),
            marker: self.marker.as_ref().map(Marker::path),
        }
    }
}

/// Display form of a handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleSnapshot {
    pub resource: String,
    pub strategy: StrategyKind,
    pub state: LockState,
    pub fencing_token: Option<i64>,
    pub remaining_validity_ms: Option<u64>,
    pub marker: Option<String>,
}
