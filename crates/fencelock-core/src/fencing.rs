//! Fencing token check for protected resources
//!
//! A resource guarded by a lock keeps the highest fencing token it has seen
//! and refuses writes carrying a lower one. This rejects a former holder
//! that kept writing after its lease lapsed (e.g. after a long GC pause).

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FencingRejection {
    #[error("write to '{0}' carries no fencing token")]
    MissingToken(String),

    #[error("stale fencing token {token} for '{resource}', highest seen is {highest}")]
    Stale {
        resource: String,
        token: i64,
        highest: i64,
    },
}

/// Highest-token-seen check kept by the protected resource
#[derive(Debug, Default)]
pub struct FencingGate {
    highest: DashMap<String, i64>,
}

impl FencingGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a write carrying `token`.
    ///
    /// A token equal to the highest seen is admitted so one holder can write
    /// repeatedly. Writes without a token are refused.
    pub fn admit(&self, resource: &str, token: Option<i64>) -> Result<(), FencingRejection> {
        let Some(token) = token else {
            return Err(FencingRejection::MissingToken(resource.to_string()));
        };

        match self.highest.entry(resource.to_string()) {
            Entry::Occupied(mut entry) => {
                let highest = *entry.get();
                if token < highest {
                    return Err(FencingRejection::Stale {
                        resource: resource.to_string(),
                        token,
                        highest,
                    });
                }
                entry.insert(token);
            }
            Entry::Vacant(entry) => {
                entry.insert(token);
            }
        }
        Ok(())
    }

    pub fn highest(&self, resource: &str) -> Option<i64> {
        self.highest.get(resource).map(|v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_increasing_tokens() {
        let gate = FencingGate::new();
        assert!(gate.admit("orders", Some(1)).is_ok());
        assert!(gate.admit("orders", Some(1)).is_ok());
        assert!(gate.admit("orders", Some(3)).is_ok());
        assert_eq!(gate.highest("orders"), Some(3));
    }

    #[test]
    fn test_rejects_stale_token() {
        let gate = FencingGate::new();
        gate.admit("orders", Some(34)).unwrap();

        let err = gate.admit("orders", Some(33)).unwrap_err();
        assert_eq!(
            err,
            FencingRejection::Stale {
                resource: "orders".to_string(),
                token: 33,
                highest: 34,
            }
        );
        assert_eq!(gate.highest("orders"), Some(34));
    }

    #[test]
    fn test_rejects_missing_token() {
        let gate = FencingGate::new();
        assert!(matches!(
            gate.admit("orders", None),
            Err(FencingRejection::MissingToken(_))
        ));
        assert_eq!(gate.highest("orders"), None);
    }

    #[test]
    fn test_resources_are_independent() {
        let gate = FencingGate::new();
        gate.admit("orders", Some(10)).unwrap();
        assert!(gate.admit("payments", Some(1)).is_ok());
    }
}
