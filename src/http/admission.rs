//! Request admission.
//!
//! Handlers call [`admit`] before doing any mutating or expensive work. A
//! rejected admission is answered with its 429 response. An accepted one
//! proceeds, and its headers are attached to the final response through
//! [`Admission::finish`].

use hyper::{Response, StatusCode};
use serde_json::json;

use super::{json_response, ResponseBody};
use crate::ratelimit::{apply_headers, RateLimitDecision, RateLimiter};

/// The limiter's verdict on one request.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    decision: RateLimitDecision,
}

/// Count the request against `identifier` and return the verdict.
pub async fn admit(limiter: &RateLimiter, identifier: impl AsRef<str>) -> Admission {
    Admission {
        decision: limiter.limit(identifier.as_ref()).await,
    }
}

impl Admission {
    pub fn decision(&self) -> &RateLimitDecision {
        &self.decision
    }

    pub fn is_admitted(&self) -> bool {
        self.decision.success()
    }

    /// The `429 Too Many Requests` response for a rejected request.
    pub fn rejection(&self) -> Option<Response<ResponseBody>> {
        if self.decision.success() {
            return None;
        }

        let body = json!({
            "error": "rate limit exceeded",
            "retryAfter": self.decision.retry_after(),
        });
        Some(self.finish(json_response(StatusCode::TOO_MANY_REQUESTS, &body)))
    }

    /// Attach the rate limit headers to a response.
    pub fn finish<B>(&self, mut response: Response<B>) -> Response<B> {
        apply_headers(&self.decision, response.headers_mut());
        response
    }
}
