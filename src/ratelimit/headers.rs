//! Rate limit response headers.

use hyper::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};

use super::decision::RateLimitDecision;

/// `X-RateLimit-Limit`: the configured quota.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// `X-RateLimit-Remaining`: admissions left in the window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// `X-RateLimit-Reset`: unix seconds when capacity frees up.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Build the rate limit headers for a decision.
///
/// `Retry-After` is only present on rejected decisions.
pub fn build_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(4);
    apply_headers(decision, &mut headers);
    headers
}

/// Insert the rate limit headers for a decision into `headers`, replacing any
/// existing values.
pub fn apply_headers(decision: &RateLimitDecision, headers: &mut HeaderMap) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit()));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining()));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset()));

    match decision.retry_after() {
        Some(seconds) => {
            headers.insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        None => {
            headers.remove(RETRY_AFTER);
        }
    }
}
