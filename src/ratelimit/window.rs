//! Sliding-window log.
//!
//! The log keeps the timestamp of every admission still inside the trailing
//! window. An admission older than `window` is evicted before each decision,
//! so at most `limit` admissions ever fall inside any trailing window,
//! whether or not a clock boundary lies in between.

use std::collections::VecDeque;

use crate::store::WindowState;

/// Admission timestamps (unix ms) for one key, oldest first.
#[derive(Debug, Clone, Default)]
pub struct SlidingLog {
    hits: VecDeque<u64>,
    /// When the whole log may be dropped: one window after the newest hit
    expires_at_ms: u64,
}

impl SlidingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every admission that has left the trailing window.
    pub fn evict(&mut self, now_ms: u64, window_ms: u64) {
        while let Some(&oldest) = self.hits.front() {
            if oldest.saturating_add(window_ms) > now_ms {
                break;
            }
            self.hits.pop_front();
        }
    }

    /// Evict, then admit `now_ms` if the log holds fewer than `limit` hits.
    pub fn record(&mut self, now_ms: u64, window_ms: u64, limit: u64) -> WindowState {
        self.evict(now_ms, window_ms);

        let admitted = (self.hits.len() as u64) < limit;
        if admitted {
            self.push(now_ms);
            self.expires_at_ms = self.expires_at_ms.max(now_ms.saturating_add(window_ms));
        }

        self.state(admitted)
    }

    /// Evict, then report whether a request at `now_ms` would be admitted.
    pub fn inspect(&mut self, now_ms: u64, window_ms: u64, limit: u64) -> WindowState {
        self.evict(now_ms, window_ms);
        let admitted = (self.hits.len() as u64) < limit;
        self.state(admitted)
    }

    /// Whether the log has outlived its last admission by a full window.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    fn push(&mut self, now_ms: u64) {
        // Keep the log sorted even if the caller's clock stepped backwards.
        match self.hits.back() {
            Some(&newest) if newest > now_ms => {
                let at = self.hits.partition_point(|&hit| hit <= now_ms);
                self.hits.insert(at, now_ms);
            }
            _ => self.hits.push_back(now_ms),
        }
    }

    fn state(&self, admitted: bool) -> WindowState {
        WindowState {
            admitted,
            count: self.hits.len() as u64,
            oldest_ms: self.hits.front().copied(),
        }
    }
}
