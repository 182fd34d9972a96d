//! Remaining-question quota tracking
//!
//! The generation service reports the user's remaining question allowance
//! on every successful completion. [`QuotaTracker`] keeps the latest value
//! for display; [`QuotaSink`] persists it so a later session can show it
//! before the first answer arrives.

use crate::error::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// Thread-safe holder of the latest remaining-question count
///
/// Cloning shares the underlying value.
#[derive(Debug)]
pub struct QuotaTracker {
    remaining: Arc<Mutex<Option<u64>>>,
    low_water: u64,
}

impl QuotaTracker {
    /// Creates a tracker with no known quota
    ///
    /// # Arguments
    ///
    /// * `low_water` - Count at or below which the quota is nearly exhausted
    ///
    /// # Examples
    ///
    /// ```
    /// use cliniq::quota::QuotaTracker;
    /// use serde_json::json;
    ///
    /// let tracker = QuotaTracker::new(5);
    /// assert_eq!(tracker.observe(&json!("29")), Some(29));
    /// assert_eq!(tracker.remaining(), Some(29));
    /// assert!(!tracker.is_nearly_exhausted());
    /// ```
    pub fn new(low_water: u64) -> Self {
        Self {
            remaining: Arc::new(Mutex::new(None)),
            low_water,
        }
    }

    /// Seeds the tracker with a previously persisted count
    pub fn set_remaining(&self, remaining: u64) {
        *self.lock() = Some(remaining);
    }

    /// Records a `remainingLimit` value from a completion payload
    ///
    /// Accepts a non-negative integer or a numeric string. `"N/A"`, null
    /// and anything else unparseable leave the stored value unchanged.
    ///
    /// # Returns
    ///
    /// The newly stored count, or `None` when the value was ignored
    pub fn observe(&self, raw: &Value) -> Option<u64> {
        let parsed = parse_remaining(raw)?;
        *self.lock() = Some(parsed);
        tracing::debug!(remaining = parsed, "Quota updated");
        Some(parsed)
    }

    /// Latest known remaining-question count
    pub fn remaining(&self) -> Option<u64> {
        *self.lock()
    }

    /// Returns true when a known count is at or below the low-water mark
    pub fn is_nearly_exhausted(&self) -> bool {
        self.remaining().is_some_and(|r| r <= self.low_water)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<u64>> {
        self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for QuotaTracker {
    fn clone(&self) -> Self {
        Self {
            remaining: Arc::clone(&self.remaining),
            low_water: self.low_water,
        }
    }
}

fn parse_remaining(raw: &Value) -> Option<u64> {
    match raw {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Persistent storage for the remaining-question count
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait QuotaSink: Send + Sync {
    /// Stores the latest count for `user_id`
    async fn persist_remaining(&self, user_id: &str, remaining: u64) -> Result<()>;

    /// Loads the stored count for `user_id`, if any
    async fn load_remaining(&self, user_id: &str) -> Result<Option<u64>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_observe_number() {
        let tracker = QuotaTracker::new(5);
        assert_eq!(tracker.observe(&json!(29)), Some(29));
        assert_eq!(tracker.remaining(), Some(29));
    }

    #[test]
    fn test_observe_numeric_string() {
        let tracker = QuotaTracker::new(5);
        assert_eq!(tracker.observe(&json!(" 12 ")), Some(12));
        assert_eq!(tracker.remaining(), Some(12));
    }

    #[test]
    fn test_not_applicable_is_ignored() {
        let tracker = QuotaTracker::new(5);
        tracker.set_remaining(7);
        assert_eq!(tracker.observe(&json!("N/A")), None);
        assert_eq!(tracker.observe(&Value::Null), None);
        assert_eq!(tracker.observe(&json!(-3)), None);
        assert_eq!(tracker.remaining(), Some(7));
    }

    #[test]
    fn test_low_water_threshold() {
        let tracker = QuotaTracker::new(5);
        assert!(!tracker.is_nearly_exhausted());
        tracker.observe(&json!(6));
        assert!(!tracker.is_nearly_exhausted());
        tracker.observe(&json!(5));
        assert!(tracker.is_nearly_exhausted());
        tracker.observe(&json!(0));
        assert!(tracker.is_nearly_exhausted());
    }

    #[test]
    fn test_clone_shares_state() {
        let tracker = QuotaTracker::new(5);
        let other = tracker.clone();
        tracker.observe(&json!(3));
        assert_eq!(other.remaining(), Some(3));
    }
}
