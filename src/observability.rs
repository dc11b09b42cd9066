use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::errors::ErrorKind;

/// Store and cache counters for one coordinator
#[derive(Debug, Default)]
pub struct TrackerMetrics {
    pub store_requests: AtomicU64,
    pub store_errors: AtomicU64,
    pub offline_rejections: AtomicU64,
    pub retries: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub background_refreshes: AtomicU64,
    pub prefetches: AtomicU64,
    pub rollbacks: AtomicU64,
    pub discarded_results: AtomicU64,
    pub cache_clears: AtomicU64,
}

impl TrackerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.store_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: ErrorKind) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
        if kind == ErrorKind::NetworkOffline {
            self.offline_rejections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_refresh(&self) {
        self.background_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch(&self) {
        self.prefetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded_result(&self) {
        self.discarded_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_clear(&self) {
        self.cache_clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> TrackerStats {
        TrackerStats {
            store_requests: self.store_requests.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            offline_rejections: self.offline_rejections.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
            prefetches: self.prefetches.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            discarded_results: self.discarded_results.load(Ordering::Relaxed),
            cache_clears: self.cache_clears.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            store_requests = stats.store_requests,
            store_errors = stats.store_errors,
            retries = stats.retries,
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            rollbacks = stats.rollbacks,
            discarded_results = stats.discarded_results,
            cache_clears = stats.cache_clears,
            "Tracker metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerStats {
    pub store_requests: u64,
    pub store_errors: u64,
    pub offline_rejections: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub background_refreshes: u64,
    pub prefetches: u64,
    pub rollbacks: u64,
    pub discarded_results: u64,
    pub cache_clears: u64,
}

/// Time a store call and log its duration on completion
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn finish(self, ok: bool) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis() as u64,
            ok,
            "Store call completed"
        );
    }
}
