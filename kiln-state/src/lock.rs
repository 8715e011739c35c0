//! Lock information for state backend locking

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default lock timeout in seconds
///
/// Longer than the default image build timeout, so an apply waiting on a
/// build does not lose its lock.
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 2 * 60 * 60;

/// Information about a state lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique identifier for this lock
    pub id: String,
    /// The operation being performed (e.g., "apply", "destroy", "import")
    pub operation: String,
    /// Who acquired the lock (username@hostname)
    pub who: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    /// Create a new lock for an operation
    pub fn new(operation: impl Into<String>) -> Self {
        Self::with_timeout(operation, DEFAULT_LOCK_TIMEOUT_SECS)
    }

    /// Create a new lock with a custom timeout
    pub fn with_timeout(operation: impl Into<String>, timeout_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: lock_owner(),
            created: now,
            expires: now + Duration::seconds(timeout_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }

    /// Get the remaining time until expiration
    pub fn time_remaining(&self) -> Duration {
        self.expires - Utc::now()
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} by {}, since {})",
            self.id,
            self.operation,
            self.who,
            self.created.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

/// username@hostname
fn lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_info_new() {
        let lock = LockInfo::new("apply");
        assert_eq!(lock.operation, "apply");
        assert!(!lock.id.is_empty());
        assert!(lock.who.contains('@'));
        assert!(!lock.is_expired());
        assert!(lock.expires > lock.created);
    }

    #[test]
    fn test_lock_info_with_timeout() {
        let lock = LockInfo::with_timeout("apply", 60);
        let remaining = lock.time_remaining();
        assert!(remaining.num_seconds() > 55);
        assert!(remaining.num_seconds() <= 60);

        let expired = LockInfo::with_timeout("apply", -1);
        assert!(expired.is_expired());
    }

    #[test]
    fn test_lock_info_display() {
        let lock = LockInfo::new("destroy");
        let shown = lock.to_string();
        assert!(shown.starts_with(&lock.id));
        assert!(shown.contains("destroy by"));
    }
}
