//! Relay statistics tracking.
//!
//! Counters only; nothing here is on the hot path beyond an atomic add.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Thread-safe relay statistics
#[derive(Debug)]
pub struct ProxyStats {
    /// Total proxied requests that reached the upstream
    requests: AtomicU64,
    /// Requests relayed as event-streams
    streaming_requests: AtomicU64,
    /// Requests relayed as buffered bodies
    buffered_requests: AtomicU64,
    /// Chat answers normalized by the reconciler
    normalized_answers: AtomicU64,
    /// Bytes written downstream
    bytes_relayed: AtomicU64,
    /// Total errors
    errors: AtomicU64,
    /// Start time
    started_at: Instant,
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            streaming_requests: AtomicU64::new(0),
            buffered_requests: AtomicU64::new(0),
            normalized_answers: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record an upstream call
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a streaming relay
    pub fn record_streaming_request(&self) {
        self.streaming_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record streaming chunk
    pub fn record_streaming_chunk(&self, bytes: usize) {
        self.bytes_relayed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a buffered relay of `bytes` bytes
    pub fn record_buffered(&self, bytes: usize) {
        self.buffered_requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a reconciled chat answer
    pub fn record_normalized(&self) {
        self.normalized_answers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total requests
    pub fn total_requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Get streaming requests count
    pub fn streaming_requests(&self) -> u64 {
        self.streaming_requests.load(Ordering::Relaxed)
    }

    /// Get buffered requests count
    pub fn buffered_requests(&self) -> u64 {
        self.buffered_requests.load(Ordering::Relaxed)
    }

    /// Get normalized answers count
    pub fn normalized_answers(&self) -> u64 {
        self.normalized_answers.load(Ordering::Relaxed)
    }

    /// Get total bytes relayed
    pub fn total_bytes_relayed(&self) -> u64 {
        self.bytes_relayed.load(Ordering::Relaxed)
    }

    /// Get total errors
    pub fn total_errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Time since the relay started
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get summary
    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            requests: self.total_requests(),
            streaming_requests: self.streaming_requests(),
            buffered_requests: self.buffered_requests(),
            normalized_answers: self.normalized_answers(),
            bytes_relayed: self.total_bytes_relayed(),
            errors: self.total_errors(),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

/// Statistics summary for the `/stats` endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    /// Upstream calls made
    pub requests: u64,
    /// Event-stream relays
    pub streaming_requests: u64,
    /// Buffered relays
    pub buffered_requests: u64,
    /// Chat answers normalized
    pub normalized_answers: u64,
    /// Bytes written downstream
    pub bytes_relayed: u64,
    /// Errors
    pub errors: u64,
    /// Uptime in seconds
    pub uptime_secs: u64,
}
