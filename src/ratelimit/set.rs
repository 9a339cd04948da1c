//! The process-wide pair of limiters.

use std::sync::Arc;

use super::clock::Clock;
use super::identifier::Scope;
use super::limiter::RateLimiter;
use crate::config::ServiceConfig;
use crate::store::{self, WindowStore};

/// Portal and API limiters sharing one store handle.
///
/// Built once at startup and passed to whatever handles requests.
#[derive(Debug)]
pub struct LimiterSet {
    portal: RateLimiter,
    api: RateLimiter,
}

impl LimiterSet {
    /// Connect the configured store and build both limiters on it.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::with_store(config, store::connect(&config.store))
    }

    /// Build both limiters on an explicit store (or none, to fail open).
    pub fn with_store(config: &ServiceConfig, store: Option<Arc<dyn WindowStore>>) -> Self {
        let build = |scope: Scope, limits| {
            RateLimiter::new(scope.as_str(), limits, store.clone())
                .with_prefix(config.store.prefix.clone())
                .with_timeout(config.store.timeout())
        };

        Self {
            portal: build(Scope::Portal, config.limits.portal),
            api: build(Scope::Api, config.limits.api),
        }
    }

    /// Replace the time source of both limiters.
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self {
            portal: self.portal.with_clock(clock.clone()),
            api: self.api.with_clock(clock),
        }
    }

    pub fn get(&self, scope: Scope) -> &RateLimiter {
        match scope {
            Scope::Portal => &self.portal,
            Scope::Api => &self.api,
        }
    }

    pub fn portal(&self) -> &RateLimiter {
        &self.portal
    }

    pub fn api(&self) -> &RateLimiter {
        &self.api
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, StoreBackend};
    use crate::ratelimit::Identifier;
    use crate::store::MemoryStore;

    #[test]
    fn test_default_quotas() {
        let set = LimiterSet::with_store(&ServiceConfig::default(), None);

        assert_eq!(set.portal().config(), RateLimitConfig::new(100, 60).unwrap());
        assert_eq!(set.api().config(), RateLimitConfig::new(60, 60).unwrap());
        assert_eq!(set.get(Scope::Portal).name(), "portal");
        assert_eq!(set.get(Scope::Api).name(), "api");
    }

    #[test]
    fn test_missing_credentials_degrade_both_limiters() {
        let set = LimiterSet::from_config(&ServiceConfig::default());

        assert!(set.portal().is_degraded());
        assert!(set.api().is_degraded());
    }

    #[tokio::test]
    async fn test_limiters_share_one_store() {
        let mut config = ServiceConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.limits.portal = RateLimitConfig::new(1, 60).unwrap();
        config.limits.api = RateLimitConfig::new(1, 60).unwrap();

        let store = Arc::new(MemoryStore::new());
        let set = LimiterSet::with_store(&config, Some(store.clone()));

        let portal_id = Identifier::new(Scope::Portal, "cust-1");
        let api_id = Identifier::new(Scope::Api, "cust-1");

        assert!(set.portal().limit(portal_id.as_str()).await.success());
        assert!(set.api().limit(api_id.as_str()).await.success());
        assert!(!set.portal().limit(portal_id.as_str()).await.success());
        assert_eq!(store.key_count(), 2);
    }
}
