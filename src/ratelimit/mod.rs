//! Rate limiting logic and admission decisions.

mod clock;
mod decision;
mod headers;
mod identifier;
mod limiter;
mod set;
mod window;

#[cfg(any(test, feature = "testing"))]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use decision::RateLimitDecision;
pub use headers::{
    apply_headers, build_headers, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use identifier::{Identifier, Scope, UnknownScope};
pub use limiter::RateLimiter;
pub use set::LimiterSet;
pub use window::SlidingLog;

pub use crate::config::RateLimitConfig;
