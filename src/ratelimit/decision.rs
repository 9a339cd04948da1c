//! Per-request admission decisions.

use serde::Serialize;

/// Outcome of a single rate limit call.
///
/// `retry_after` is present exactly when the request was rejected; the two
/// constructors are the only way to build a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    success: bool,
    limit: u64,
    remaining: u64,
    reset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl RateLimitDecision {
    /// The request may proceed.
    pub fn allowed(limit: u64, remaining: u64, reset: u64) -> Self {
        Self {
            success: true,
            limit,
            remaining: remaining.min(limit),
            reset,
            retry_after: None,
        }
    }

    /// The request is over quota. `retry_after` is clamped to at least one
    /// second.
    pub fn rejected(limit: u64, reset: u64, retry_after: u64) -> Self {
        Self {
            success: false,
            limit,
            remaining: 0,
            reset,
            retry_after: Some(retry_after.max(1)),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// Configured quota.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Admissions left in the current window.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Unix seconds at which the oldest admission leaves the window.
    pub fn reset(&self) -> u64 {
        self.reset
    }

    /// Seconds until a retry can succeed, for rejected requests.
    pub fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_allowed_has_no_retry_after() {
        let decision = RateLimitDecision::allowed(10, 4, 1_700_000_060);

        assert!(decision.success());
        assert_eq!(decision.remaining(), 4);
        assert_eq!(decision.retry_after(), None);
    }

    #[test]
    fn test_rejected_has_zero_remaining_and_positive_retry() {
        let decision = RateLimitDecision::rejected(10, 1_700_000_060, 0);

        assert!(!decision.success());
        assert_eq!(decision.remaining(), 0);
        assert_eq!(decision.retry_after(), Some(1));
    }

    #[test]
    fn test_json_shape() {
        let allowed = serde_json::to_value(RateLimitDecision::allowed(3, 2, 100)).unwrap();
        assert_eq!(
            allowed,
            json!({"success": true, "limit": 3, "remaining": 2, "reset": 100})
        );

        let rejected = serde_json::to_value(RateLimitDecision::rejected(3, 100, 9)).unwrap();
        assert_eq!(
            rejected,
            json!({"success": false, "limit": 3, "remaining": 0, "reset": 100, "retryAfter": 9})
        );
    }
}
