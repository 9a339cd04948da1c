//! Process-local window store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{StoreError, WindowRequest, WindowState, WindowStore};
use crate::ratelimit::{Clock, SlidingLog, SystemClock};

/// In-memory window store.
///
/// Each key's log is updated under its map shard lock, so concurrent calls
/// for one key are serialized. Nothing is shared with other processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: DashMap<String, SlidingLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every log whose newest admission has left its window.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let before = self.logs.len();
        self.logs.retain(|_, log| !log.is_expired(now_ms));
        let removed = before.saturating_sub(self.logs.len());
        if removed > 0 {
            debug!(removed, remaining = self.logs.len(), "Swept expired window logs");
        }
        removed
    }

    /// Sweep expired logs every `every` until the store is dropped.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.sweep(SystemClock.now_ms());
            }
        })
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.logs.len()
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn record(&self, key: &str, request: WindowRequest) -> Result<WindowState, StoreError> {
        let mut log = self.logs.entry(key.to_string()).or_default();
        Ok(log.record(request.now_ms, request.window_ms, request.limit))
    }

    async fn inspect(
        &self,
        key: &str,
        request: WindowRequest,
    ) -> Result<WindowState, StoreError> {
        // Peeking an unknown key must not create one.
        match self.logs.get_mut(key) {
            Some(mut log) => Ok(log.inspect(request.now_ms, request.window_ms, request.limit)),
            None => Ok(WindowState {
                admitted: true,
                count: 0,
                oldest_ms: None,
            }),
        }
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.logs.remove(key);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    const START: u64 = 1_700_000_000_000;

    fn request(now_ms: u64, limit: u64) -> WindowRequest {
        WindowRequest {
            now_ms,
            window_ms: 10_000,
            limit,
        }
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new();

        store.record("a", request(START, 1)).await.unwrap();
        let a = store.record("a", request(START, 1)).await.unwrap();
        let b = store.record("b", request(START, 1)).await.unwrap();

        assert!(!a.admitted);
        assert!(b.admitted);
        assert_eq!(store.key_count(), 2);
    }

    #[tokio::test]
    async fn test_inspect_unknown_key_creates_nothing() {
        let store = MemoryStore::new();

        let state = store.inspect("missing", request(START, 5)).await.unwrap();
        assert!(state.admitted);
        assert_eq!(state.count, 0);
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_forgets_key() {
        let store = MemoryStore::new();
        store.record("a", request(START, 1)).await.unwrap();

        store.clear("a").await.unwrap();

        assert_eq!(store.key_count(), 0);
        assert!(store.record("a", request(START, 1)).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_logs() {
        let store = MemoryStore::new();
        store.record("old", request(START, 5)).await.unwrap();
        store.record("new", request(START + 8_000, 5)).await.unwrap();

        assert_eq!(store.sweep(START + 10_000), 1);
        assert_eq!(store.key_count(), 1);
        assert_eq!(store.inspect("new", request(START + 10_000, 5)).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_store_dropped() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = store.spawn_sweeper(Duration::from_millis(5));

        drop(store);

        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_records_never_exceed_limit() {
        let store = Arc::new(MemoryStore::new());

        let calls = (0..50).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.record("shared", request(START, 20)).await.unwrap() })
        });
        let results = join_all(calls).await;

        let admitted = results
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|state| state.admitted)
            .count();
        assert_eq!(admitted, 20);
    }
}
