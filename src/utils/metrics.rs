//! Observability and Metrics
//!
//! Atomic counters for pool, codec and watchdog activity. Counters are
//! monotonic and updated with relaxed ordering; read them through
//! [`Metrics::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Engine-wide metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Buffers handed out by any pool
    pub pool_acquisitions: AtomicU64,
    /// Acquisitions served from a free list
    pub pool_hits: AtomicU64,
    /// Acquisitions that fell back to a fresh allocation
    pub pool_fallbacks: AtomicU64,
    /// Buffers returned to a pool
    pub pool_releases: AtomicU64,
    /// Rejected releases
    pub invalid_releases: AtomicU64,
    /// Packets encoded
    pub packets_encoded: AtomicU64,
    /// Packets decoded
    pub packets_decoded: AtomicU64,
    /// Encode failures
    pub encode_failures: AtomicU64,
    /// Decode failures
    pub decode_failures: AtomicU64,
    /// Completed watchdog scans
    pub watchdog_iterations: AtomicU64,
    /// Prohibited indicators matched
    pub watchdog_detections: AtomicU64,
    /// Stop requests that outlived the grace period
    pub watchdog_stalls: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            pool_acquisitions: AtomicU64::new(0),
            pool_hits: AtomicU64::new(0),
            pool_fallbacks: AtomicU64::new(0),
            pool_releases: AtomicU64::new(0),
            invalid_releases: AtomicU64::new(0),
            packets_encoded: AtomicU64::new(0),
            packets_decoded: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            watchdog_iterations: AtomicU64::new(0),
            watchdog_detections: AtomicU64::new(0),
            watchdog_stalls: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn pool_acquired(&self) {
        self.pool_acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pool_hit(&self) {
        self.pool_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pool_fallback(&self) {
        self.pool_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pool_released(&self) {
        self.pool_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_release(&self) {
        self.invalid_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_encoded(&self) {
        self.packets_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_decoded(&self) {
        self.packets_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn watchdog_iteration(&self) {
        self.watchdog_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn watchdog_detection(&self) {
        self.watchdog_detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn watchdog_stall(&self) {
        self.watchdog_stalls.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pool_acquisitions: self.pool_acquisitions.load(Ordering::Relaxed),
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
            pool_fallbacks: self.pool_fallbacks.load(Ordering::Relaxed),
            pool_releases: self.pool_releases.load(Ordering::Relaxed),
            invalid_releases: self.invalid_releases.load(Ordering::Relaxed),
            packets_encoded: self.packets_encoded.load(Ordering::Relaxed),
            packets_decoded: self.packets_decoded.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            watchdog_iterations: self.watchdog_iterations.load(Ordering::Relaxed),
            watchdog_detections: self.watchdog_detections.load(Ordering::Relaxed),
            watchdog_stalls: self.watchdog_stalls.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            pool_acquisitions = s.pool_acquisitions,
            pool_hits = s.pool_hits,
            pool_fallbacks = s.pool_fallbacks,
            pool_releases = s.pool_releases,
            invalid_releases = s.invalid_releases,
            packets_encoded = s.packets_encoded,
            packets_decoded = s.packets_decoded,
            encode_failures = s.encode_failures,
            decode_failures = s.decode_failures,
            watchdog_iterations = s.watchdog_iterations,
            watchdog_detections = s.watchdog_detections,
            watchdog_stalls = s.watchdog_stalls,
            uptime_seconds = s.uptime_seconds,
            "Engine metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub pool_acquisitions: u64,
    pub pool_hits: u64,
    pub pool_fallbacks: u64,
    pub pool_releases: u64,
    pub invalid_releases: u64,
    pub packets_encoded: u64,
    pub packets_decoded: u64,
    pub encode_failures: u64,
    pub decode_failures: u64,
    pub watchdog_iterations: u64,
    pub watchdog_detections: u64,
    pub watchdog_stalls: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
