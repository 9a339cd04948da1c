//! Store doubles for exercising failure paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{MemoryStore, StoreError, WindowRequest, WindowState, WindowStore};

/// A store whose every call fails, like a service that is down.
#[derive(Debug, Default)]
pub struct UnreachableStore {
    calls: AtomicUsize,
}

impl UnreachableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls attempted against the store.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self) -> StoreError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StoreError::Unavailable("connection refused".to_string())
    }
}

#[async_trait]
impl WindowStore for UnreachableStore {
    async fn record(&self, _key: &str, _request: WindowRequest) -> Result<WindowState, StoreError> {
        Err(self.fail())
    }

    async fn inspect(
        &self,
        _key: &str,
        _request: WindowRequest,
    ) -> Result<WindowState, StoreError> {
        Err(self.fail())
    }

    async fn clear(&self, _key: &str) -> Result<(), StoreError> {
        Err(self.fail())
    }

    fn kind(&self) -> &'static str {
        "unreachable"
    }
}

/// A store that hangs for `delay` before answering from memory.
#[derive(Debug)]
pub struct StalledStore {
    delay: Duration,
    inner: MemoryStore,
}

impl StalledStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: MemoryStore::new(),
        }
    }
}

#[async_trait]
impl WindowStore for StalledStore {
    async fn record(&self, key: &str, request: WindowRequest) -> Result<WindowState, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.record(key, request).await
    }

    async fn inspect(
        &self,
        key: &str,
        request: WindowRequest,
    ) -> Result<WindowState, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.inspect(key, request).await
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.clear(key).await
    }

    fn kind(&self) -> &'static str {
        "stalled"
    }
}

/// An in-memory store that can be switched into failure and back.
#[derive(Debug, Default)]
pub struct FlakyStore {
    failing: AtomicBool,
    inner: MemoryStore,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Remote("ERR max requests limit exceeded".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WindowStore for FlakyStore {
    async fn record(&self, key: &str, request: WindowRequest) -> Result<WindowState, StoreError> {
        self.check()?;
        self.inner.record(key, request).await
    }

    async fn inspect(
        &self,
        key: &str,
        request: WindowRequest,
    ) -> Result<WindowState, StoreError> {
        self.check()?;
        self.inner.inspect(key, request).await
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.clear(key).await
    }

    fn kind(&self) -> &'static str {
        "flaky"
    }
}
