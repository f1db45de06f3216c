//! Proxy counters, shared across request handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ProxyStats {
    /// Served fresh from the store
    pub hits: Arc<AtomicUsize>,
    /// Served stale from the store (refresh scheduled)
    pub stale_hits: Arc<AtomicUsize>,
    /// Fetched from origin because nothing usable was stored
    pub misses: Arc<AtomicUsize>,
    /// Non-GET requests sent straight to origin
    pub bypassed: Arc<AtomicUsize>,
    /// Origin could not be reached
    pub origin_failures: Arc<AtomicUsize>,
    pub refreshes_enqueued: Arc<AtomicUsize>,
    /// Refreshes the queue refused
    pub refreshes_dropped: Arc<AtomicUsize>,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_origin_failure(&self) {
        self.origin_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self, accepted: bool) {
        if accepted {
            self.refreshes_enqueued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.refreshes_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
            + self.stale_hits.load(Ordering::Relaxed)
            + self.misses.load(Ordering::Relaxed)
            + self.bypassed.load(Ordering::Relaxed)
    }

    /// Share of cacheable requests answered from the store (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits.load(Ordering::Relaxed) + self.stale_hits.load(Ordering::Relaxed);
        let cacheable = served + self.misses.load(Ordering::Relaxed);
        if cacheable == 0 {
            0.0
        } else {
            served as f64 / cacheable as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} requests ({:.0}% from cache): {} fresh, {} stale, {} miss, {} bypass; {} origin failures; {} refreshes queued, {} dropped",
            self.requests(),
            self.hit_rate() * 100.0,
            self.hits.load(Ordering::Relaxed),
            self.stale_hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.bypassed.load(Ordering::Relaxed),
            self.origin_failures.load(Ordering::Relaxed),
            self.refreshes_enqueued.load(Ordering::Relaxed),
            self.refreshes_dropped.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let stats = ProxyStats::new();
        let other = stats.clone();
        other.record_hit();
        other.record_stale();
        stats.record_miss();
        stats.record_bypass();
        assert_eq!(stats.requests(), 4);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_refresh_outcomes() {
        let stats = ProxyStats::new();
        stats.record_refresh(true);
        stats.record_refresh(false);
        assert_eq!(stats.refreshes_enqueued.load(Ordering::Relaxed), 1);
        assert_eq!(stats.refreshes_dropped.load(Ordering::Relaxed), 1);
        assert!(stats.summary().contains("1 refreshes queued, 1 dropped"));
        assert!(stats.summary().starts_with("0 requests (0% from cache)"));
    }

    #[test]
    fn test_empty_hit_rate() {
        assert_eq!(ProxyStats::new().hit_rate(), 0.0);
    }
}
