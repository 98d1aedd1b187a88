//! Utility functions for fencelock
//!
//! Helpers shared by the quorum and sequential lock strategies.

use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::CLOCK_DRIFT_BASE_MS;

/// Regex pattern for resource names usable as a queue path segment
static VALID_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new("^[a-zA-Z0-9_.:-]+$").expect("Invalid regex pattern"));

/// Validate a resource name contains only allowed characters
///
/// Allowed characters: alphanumeric, underscore, dot, colon, hyphen.
/// Empty names are rejected.
///
/// # Examples
///
/// ```
/// use fencelock_common::is_valid;
///
/// assert!(is_valid("orders:42"));
/// assert!(is_valid("cache-invalidation"));
/// assert!(!is_valid("invalid/path"));
/// assert!(!is_valid(""));
/// ```
pub fn is_valid(str: &str) -> bool {
    VALID_PATTERN.is_match(str)
}

/// Encode an arbitrary resource name as a single queue path segment
///
/// Names that are already valid pass through unchanged; anything else has
/// every byte outside the valid set percent-encoded. Encoded names always
/// contain `%`, which valid names never do, so distinct resources never
/// share a queue.
///
/// # Examples
///
/// ```
/// use fencelock_common::encode_path_segment;
///
/// assert_eq!(encode_path_segment("orders:42"), "orders:42");
/// assert_eq!(encode_path_segment("users/42 counter"), "users%2F42%20counter");
/// assert_eq!(encode_path_segment(".."), "%2E%2E");
/// ```
pub fn encode_path_segment(resource: &str) -> String {
    if is_valid(resource) && resource != "." && resource != ".." {
        return resource.to_string();
    }

    let mut encoded = String::with_capacity(resource.len() * 3);
    for byte in resource.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b':' | b'-' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Generate a fresh, high-entropy ownership token (128 random bits, hex encoded)
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Number of acknowledgments required out of `backends` nodes
///
/// # Examples
///
/// ```
/// use fencelock_common::quorum;
///
/// assert_eq!(quorum(1), 1);
/// assert_eq!(quorum(3), 2);
/// assert_eq!(quorum(4), 3);
/// assert_eq!(quorum(5), 3);
/// ```
pub fn quorum(backends: usize) -> usize {
    backends / 2 + 1
}

/// Clock drift margin subtracted from a lock's validity window
pub fn clock_drift(ttl: Duration, factor: f64) -> Duration {
    ttl.mul_f64(factor) + Duration::from_millis(CLOCK_DRIFT_BASE_MS)
}

/// Random delay in `[0, base]`, added to retry backoff to de-synchronize contenders
pub fn jitter(base: Duration) -> Duration {
    let max = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    if max == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max))
}
