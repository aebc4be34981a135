//! Metrics collection for range-request traffic.
//!
//! Thread-safe tracking of HTTP requests issued by a stream: bytes
//! transferred, request count, cache hits, retries and rate-limit waits.
//! This replaces ad-hoc console output: the stream stays silent and
//! callers read the numbers they care about.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Record of a single range request that returned a body.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// Number of bytes transferred
    pub bytes: u64,
    /// Byte offset of the request
    pub offset: u64,
    /// Requested length
    pub length: u64,
}

/// Collector for a stream's network activity.
#[derive(Debug, Default)]
pub struct TransferMetrics {
    /// Total bytes transferred
    total_bytes: AtomicU64,
    /// Total number of HTTP requests issued (including failed attempts)
    request_count: AtomicUsize,
    /// Reads satisfied from a cached region without a request
    cache_hits: AtomicUsize,
    /// Transient-failure retries performed
    retries: AtomicUsize,
    /// 429 waits honored
    rate_limit_waits: AtomicUsize,
    /// Total time slept for backoff and rate limiting (nanoseconds)
    total_wait_ns: AtomicU64,
    /// Individual successful request records
    requests: RwLock<Vec<RequestRecord>>,
}

impl TransferMetrics {
    /// Create a new collector wrapped in Arc for sharing
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, bytes: u64, offset: u64, length: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let mut requests = self.requests.write().unwrap();
        requests.push(RequestRecord {
            bytes,
            offset,
            length,
        });
    }

    /// Record a request that never produced a usable body.
    pub fn record_failed_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self, wait: Duration) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ns
            .fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_rate_limit_wait(&self, wait: Duration) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ns
            .fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn rate_limit_waits(&self) -> usize {
        self.rate_limit_waits.load(Ordering::Relaxed)
    }

    pub fn total_wait(&self) -> Duration {
        Duration::from_nanos(self.total_wait_ns.load(Ordering::Relaxed))
    }

    /// Get all individual request records
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.read().unwrap().clone()
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.total_bytes.store(0, Ordering::Relaxed);
        self.request_count.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.rate_limit_waits.store(0, Ordering::Relaxed);
        self.total_wait_ns.store(0, Ordering::Relaxed);
        self.requests.write().unwrap().clear();
    }
}
