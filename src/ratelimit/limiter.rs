//! Core rate limiter implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::decision::RateLimitDecision;
use crate::config::RateLimitConfig;
use crate::store::{StoreError, WindowRequest, WindowState, WindowStore};

/// Default bound on a single store call.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(300);
/// Default namespace for store keys.
const DEFAULT_PREFIX: &str = "ratelimit";

/// A sliding-window rate limiter over a shared window store.
///
/// The limiter fails open: when the store is missing, erroring or slow, every
/// request is allowed with the full quota reported. It never returns an
/// error to its caller.
pub struct RateLimiter {
    /// Name used in logs ("portal", "api")
    name: String,
    config: RateLimitConfig,
    /// `None` means permanently degraded
    store: Option<Arc<dyn WindowStore>>,
    prefix: String,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("store", &self.store.as_ref().map(|s| s.kind()))
            .field("prefix", &self.prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter.
    ///
    /// Without a store the limiter allows everything for its whole lifetime;
    /// that is reported here, once, rather than on every request.
    pub fn new(
        name: impl Into<String>,
        config: RateLimitConfig,
        store: Option<Arc<dyn WindowStore>>,
    ) -> Self {
        let name = name.into();

        match &store {
            Some(store) => debug!(
                limiter = %name,
                store = store.kind(),
                requests = config.requests(),
                window_secs = config.window_secs(),
                "Rate limiter initialized"
            ),
            None => warn!(
                limiter = %name,
                "No window store available; rate limiting is disabled and all requests are allowed"
            ),
        }

        Self {
            name,
            config,
            store,
            prefix: DEFAULT_PREFIX.to_string(),
            clock: Arc::new(SystemClock),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound each store call; slower calls fail open.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Namespace prepended to store keys.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Whether the limiter was built without a store.
    pub fn is_degraded(&self) -> bool {
        self.store.is_none()
    }

    /// Admit or reject a request for `identifier`, consuming one unit of
    /// quota when admitted.
    pub async fn limit(&self, identifier: &str) -> RateLimitDecision {
        let key = self.key(identifier);
        let request = self.window_request();

        trace!(limiter = %self.name, identifier = %identifier, "Checking rate limit");

        let Some(store) = &self.store else {
            return self.fail_open(request.now_ms);
        };

        match self.bounded(store.record(&key, request)).await {
            Ok(state) => {
                let decision = self.decide(state, request.now_ms);
                if !decision.success() {
                    debug!(
                        limiter = %self.name,
                        identifier = %identifier,
                        retry_after = decision.retry_after(),
                        "Rate limit exceeded"
                    );
                }
                decision
            }
            Err(e) => {
                warn!(
                    limiter = %self.name,
                    identifier = %identifier,
                    error = %e,
                    "Window store call failed; allowing request"
                );
                self.fail_open(request.now_ms)
            }
        }
    }

    /// Report what `limit` would decide for `identifier` without consuming
    /// quota.
    pub async fn check(&self, identifier: &str) -> RateLimitDecision {
        let key = self.key(identifier);
        let request = self.window_request();

        let Some(store) = &self.store else {
            return self.fail_open(request.now_ms);
        };

        match self.bounded(store.inspect(&key, request)).await {
            Ok(state) => self.decide(state, request.now_ms),
            Err(e) => {
                warn!(
                    limiter = %self.name,
                    identifier = %identifier,
                    error = %e,
                    "Window store inspection failed; reporting full quota"
                );
                self.fail_open(request.now_ms)
            }
        }
    }

    /// Forget every admission recorded for `identifier`.
    ///
    /// Best effort: failures are logged and swallowed.
    pub async fn reset(&self, identifier: &str) {
        let Some(store) = &self.store else {
            debug!(
                limiter = %self.name,
                identifier = %identifier,
                "Reset skipped; no window store"
            );
            return;
        };

        match self.bounded(store.clear(&self.key(identifier))).await {
            Ok(()) => debug!(
                limiter = %self.name,
                identifier = %identifier,
                "Rate limit window reset"
            ),
            Err(e) => warn!(
                limiter = %self.name,
                identifier = %identifier,
                error = %e,
                "Failed to reset rate limit window"
            ),
        }
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.prefix, identifier)
    }

    fn window_request(&self) -> WindowRequest {
        WindowRequest {
            now_ms: self.clock.now_ms(),
            window_ms: self.config.window_ms(),
            limit: self.config.requests(),
        }
    }

    /// Run a store call under the configured timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout(self.timeout)))
    }

    fn decide(&self, state: WindowState, now_ms: u64) -> RateLimitDecision {
        let limit = self.config.requests();
        let window_ms = self.config.window_ms();

        // Capacity frees up when the oldest admission leaves the window.
        let reset_ms = state
            .oldest_ms
            .unwrap_or(now_ms)
            .saturating_add(window_ms);
        let reset = ceil_secs(reset_ms);

        if state.admitted {
            RateLimitDecision::allowed(limit, limit.saturating_sub(state.count), reset)
        } else {
            let retry_after = ceil_secs(reset_ms.saturating_sub(now_ms));
            RateLimitDecision::rejected(limit, reset, retry_after)
        }
    }

    fn fail_open(&self, now_ms: u64) -> RateLimitDecision {
        let limit = self.config.requests();
        let reset = ceil_secs(now_ms.saturating_add(self.config.window_ms()));
        RateLimitDecision::allowed(limit, limit, reset)
    }
}

fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}
