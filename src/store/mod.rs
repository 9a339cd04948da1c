//! Window stores backing the sliding-window limiter.
//!
//! A store owns the admission logs. Counters are only as consistent across
//! processes as the store makes them: each operation must evict, count and
//! append atomically for its key.

mod memory;
mod rest;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use memory::MemoryStore;
pub use rest::RestStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{StoreBackend, StoreConfig};

/// How often the in-process store drops expired logs.
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Errors raised by a window store call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store replied with an error: {0}")]
    Remote(String),
    #[error("unexpected store reply: {0}")]
    Protocol(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Parameters of a single window operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRequest {
    /// Current time, unix milliseconds
    pub now_ms: u64,
    /// Length of the trailing window in milliseconds
    pub window_ms: u64,
    /// Maximum admissions inside the window
    pub limit: u64,
}

/// State of a key's window after a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Whether the request was (or, when inspecting, would be) admitted
    pub admitted: bool,
    /// Admissions inside the trailing window after the operation
    pub count: u64,
    /// Oldest admission still inside the window
    pub oldest_ms: Option<u64>,
}

/// A shared store of sliding-window admission logs.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Evict expired admissions and admit the request if under the limit.
    async fn record(&self, key: &str, request: WindowRequest) -> Result<WindowState, StoreError>;

    /// Evict expired admissions and report without admitting.
    async fn inspect(&self, key: &str, request: WindowRequest)
        -> Result<WindowState, StoreError>;

    /// Forget every admission for the key.
    async fn clear(&self, key: &str) -> Result<(), StoreError>;

    /// Short name for logs.
    fn kind(&self) -> &'static str;
}

/// Build the configured window store.
///
/// The in-process store sweeps expired logs in the background when called
/// inside a Tokio runtime.
///
/// Returns `None` when the store cannot be used at all, in which case limiters
/// built on it run permanently in fail-open mode.
pub fn connect(config: &StoreConfig) -> Option<Arc<dyn WindowStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-process window store; counters are not shared between instances");
            let store = Arc::new(MemoryStore::new());
            if tokio::runtime::Handle::try_current().is_ok() {
                store.spawn_sweeper(MEMORY_SWEEP_INTERVAL);
            } else {
                warn!("No async runtime; expired window logs will not be swept");
            }
            Some(store)
        }
        StoreBackend::Rest => {
            let Some((url, token)) = config.credentials() else {
                warn!("Window store credentials are not configured");
                return None;
            };

            match RestStore::new(url, token, config.timeout()) {
                Ok(store) => {
                    info!(endpoint = %url, "Using REST window store");
                    Some(Arc::new(store))
                }
                Err(e) => {
                    warn!(error = %e, "Failed to build REST window store client");
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory_backend() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..StoreConfig::default()
        };

        let store = connect(&config).unwrap();
        assert_eq!(store.kind(), "memory");
    }

    #[test]
    fn test_connect_memory_backend_outside_runtime() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..StoreConfig::default()
        };

        let store = connect(&config).unwrap();
        assert_eq!(store.kind(), "memory");
    }

    #[test]
    fn test_connect_rest_without_credentials() {
        assert!(connect(&StoreConfig::default()).is_none());

        let config = StoreConfig {
            url: Some("https://example-store.upstash.io".to_string()),
            ..StoreConfig::default()
        };
        assert!(connect(&config).is_none());
    }

    #[test]
    fn test_connect_rest_with_credentials() {
        let config = StoreConfig {
            url: Some("https://example-store.upstash.io".to_string()),
            token: Some("token".to_string()),
            ..StoreConfig::default()
        };

        let store = connect(&config).unwrap();
        assert_eq!(store.kind(), "rest");
    }
}
