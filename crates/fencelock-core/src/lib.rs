//! Fencelock Core - distributed lock strategies
//!
//! This crate provides:
//! - Quorum lock manager over independent TTL storage nodes (Redlock)
//! - Sequential-queue lock over an ordered-node coordination service
//! - Lock handles carrying fencing tokens, validity and state
//! - A fencing gate for resources protected by these locks

pub mod fencing;
pub mod handle;
pub mod metrics;
pub mod quorum;
pub mod sequential;
pub mod strategy;

pub use fencing::{FencingGate, FencingRejection};
pub use handle::{HandleSnapshot, LockHandle, LockState, SessionLiveness, StrategyKind, Validity};
pub use quorum::{QuorumConfig, QuorumLockManager};
pub use sequential::{SequentialConfig, SequentialLock};
pub use strategy::{AcquireRequest, Acquisition, LockStrategy, run_locked};

pub use fencelock_backend::{MemoryBackend, MemorySequenceStore, SequenceStore, StorageBackend};
pub use fencelock_common::{LockError, Result};
