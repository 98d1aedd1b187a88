//! Fencelock Common - Shared types and helpers
//!
//! This crate provides the foundational pieces used by every fencelock component:
//! - Error types for backends and lock operations
//! - Protocol constants (default TTL, retry policy, clock drift)
//! - Token, quorum, drift and jitter helpers

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{BackendError, LockError, Result};
pub use utils::{clock_drift, encode_path_segment, generate_token, is_valid, jitter, quorum};

/// Default lock time-to-live in milliseconds
pub const DEFAULT_TTL_MS: u64 = 10_000;

/// Largest accepted lock time-to-live in milliseconds (the Redis `PX` limit)
pub const MAX_TTL_MS: u64 = i64::MAX as u64;

/// Default number of retries after the first acquisition attempt
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default base delay between acquisition attempts in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;

/// Default per-call backend timeout in milliseconds
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 500;

/// Fraction of the TTL reserved for clock drift between nodes
pub const DEFAULT_CLOCK_DRIFT_FACTOR: f64 = 0.01;

/// Fixed clock drift allowance added on top of the proportional part
pub const CLOCK_DRIFT_BASE_MS: u64 = 2;

/// Suffix appended to a resource name to form its fencing counter key
pub const FENCING_KEY_SUFFIX: &str = ":fencing";

/// Root path under which sequential lock queues are created
pub const DEFAULT_QUEUE_BASE_PATH: &str = "/locks";

/// Name prefix of a sequential queue marker
pub const MARKER_PREFIX: &str = "lock-";

/// Default coordination session time-to-live in milliseconds
pub const DEFAULT_SESSION_TTL_MS: u64 = 10_000;

/// Default poll interval while waiting in a sequential queue
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
