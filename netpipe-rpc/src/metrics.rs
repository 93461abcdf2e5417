//! Opt-in, atomics-only metrics for a Remote instance.
//!
//! Every counter is updated with a plain atomic operation; the one gauge
//! that needs a running maximum (`peak_in_flight_requests`) uses a
//! compare-and-swap loop. `MetricsTracker` is an RAII guard around a
//! single call: it records success/failure/timeout on an explicit
//! `finish_*` call, and falls back to "failure" on `Drop` if none of
//! those ran.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Default)]
pub struct RemoteMetrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub timeout_requests: AtomicU64,
    pub handler_invocations: AtomicU64,

    pub in_flight_requests: AtomicU64,
    pub peak_in_flight_requests: AtomicU64,

    pub total_latency_us: AtomicU64,
    pub min_latency_us: AtomicU64,
    pub max_latency_us: AtomicU64,
    pub total_handler_time_us: AtomicU64,

    pub total_request_bytes: AtomicU64,
    pub total_response_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeout_requests: u64,
    pub handler_invocations: u64,
    pub in_flight_requests: u64,
    pub peak_in_flight_requests: u64,
    pub avg_latency_us: f64,
    pub min_latency_us: u64,
    pub max_latency_us: u64,
    pub avg_handler_time_us: f64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub timeout_rate: f64,
    pub avg_request_bytes: f64,
    pub avg_response_bytes: f64,
}

impl RemoteMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_call(&self, request_bytes: usize) -> MetricsTracker<'_> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_request_bytes.fetch_add(request_bytes as u64, Ordering::Relaxed);
        let in_flight = self.in_flight_requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.bump_peak(in_flight);
        MetricsTracker { metrics: self, started: Instant::now(), finished: false }
    }

    fn bump_peak(&self, observed: u64) {
        let mut current = self.peak_in_flight_requests.load(Ordering::Relaxed);
        while observed > current {
            match self.peak_in_flight_requests.compare_exchange_weak(
                current,
                observed,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn record_latency(&self, latency_us: u64) {
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        let mut current_min = self.min_latency_us.load(Ordering::Relaxed);
        while current_min == 0 || latency_us < current_min {
            match self.min_latency_us.compare_exchange_weak(
                current_min,
                latency_us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_min = actual,
            }
        }
        let mut current_max = self.max_latency_us.load(Ordering::Relaxed);
        while latency_us > current_max {
            match self.max_latency_us.compare_exchange_weak(
                current_max,
                latency_us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_max = actual,
            }
        }
    }

    pub fn record_handler_invocation(&self, duration_us: u64) {
        self.handler_invocations.fetch_add(1, Ordering::Relaxed);
        self.total_handler_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let timeouts = self.timeout_requests.load(Ordering::Relaxed);
        let handler_invocations = self.handler_invocations.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);
        let total_handler_time = self.total_handler_time_us.load(Ordering::Relaxed);
        let total_req_bytes = self.total_request_bytes.load(Ordering::Relaxed);
        let total_resp_bytes = self.total_response_bytes.load(Ordering::Relaxed);
        let denom = total.max(1) as f64;

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            timeout_requests: timeouts,
            handler_invocations,
            in_flight_requests: self.in_flight_requests.load(Ordering::Relaxed),
            peak_in_flight_requests: self.peak_in_flight_requests.load(Ordering::Relaxed),
            avg_latency_us: total_latency as f64 / denom,
            min_latency_us: self.min_latency_us.load(Ordering::Relaxed),
            max_latency_us: self.max_latency_us.load(Ordering::Relaxed),
            avg_handler_time_us: total_handler_time as f64 / (handler_invocations.max(1) as f64),
            success_rate: successful as f64 / denom,
            failure_rate: failed as f64 / denom,
            timeout_rate: timeouts as f64 / denom,
            avg_request_bytes: total_req_bytes as f64 / denom,
            avg_response_bytes: total_resp_bytes as f64 / denom,
        }
    }

    /// Reset every counter to zero. Takes `&self`, not `&mut self`: every
    /// field is an atomic reached through a shared reference, so this
    /// resets them one at a time rather than replacing the struct.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.timeout_requests.store(0, Ordering::Relaxed);
        self.handler_invocations.store(0, Ordering::Relaxed);
        self.in_flight_requests.store(0, Ordering::Relaxed);
        self.peak_in_flight_requests.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
        self.min_latency_us.store(0, Ordering::Relaxed);
        self.max_latency_us.store(0, Ordering::Relaxed);
        self.total_handler_time_us.store(0, Ordering::Relaxed);
        self.total_request_bytes.store(0, Ordering::Relaxed);
        self.total_response_bytes.store(0, Ordering::Relaxed);
    }
}

/// RAII guard for one in-flight call: decrements `in_flight_requests` and
/// records latency/outcome when `finish_*` is called (or, failing that,
/// on drop, which counts it as a failure — a tracker that is simply
/// dropped without a recorded outcome represents a bug at the call site,
/// not a recoverable state).
pub struct MetricsTracker<'a> {
    metrics: &'a RemoteMetrics,
    started: Instant,
    finished: bool,
}

impl<'a> MetricsTracker<'a> {
    fn elapsed_us(&self) -> u64 {
        self.started.elapsed().as_micros() as u64
    }

    pub fn finish_success(mut self, response_bytes: usize) {
        self.metrics.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.metrics.total_response_bytes.fetch_add(response_bytes as u64, Ordering::Relaxed);
        self.metrics.record_latency(self.elapsed_us());
        self.metrics.in_flight_requests.fetch_sub(1, Ordering::Relaxed);
        self.finished = true;
    }

    pub fn finish_failure(mut self) {
        self.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_latency(self.elapsed_us());
        self.metrics.in_flight_requests.fetch_sub(1, Ordering::Relaxed);
        self.finished = true;
    }

    pub fn finish_timeout(mut self) {
        self.metrics.timeout_requests.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_latency(self.elapsed_us());
        self.metrics.in_flight_requests.fetch_sub(1, Ordering::Relaxed);
        self.finished = true;
    }
}

impl<'a> Drop for MetricsTracker<'a> {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
            self.metrics.in_flight_requests.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_in_flight_tracks_concurrent_calls() {
        let metrics = RemoteMetrics::new();
        let t1 = metrics.begin_call(10);
        let t2 = metrics.begin_call(10);
        assert_eq!(metrics.peak_in_flight_requests.load(Ordering::Relaxed), 2);
        t1.finish_success(5);
        t2.finish_success(5);
        let snap = metrics.snapshot();
        assert_eq!(snap.peak_in_flight_requests, 2);
        assert_eq!(snap.in_flight_requests, 0);
        assert_eq!(snap.successful_requests, 2);
    }

    #[test]
    fn derived_rates() {
        let metrics = RemoteMetrics::new();
        metrics.begin_call(100).finish_success(50);
        metrics.begin_call(100).finish_failure();
        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert!((snap.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((snap.failure_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn reset_clears_all_counters() {
        let metrics = RemoteMetrics::new();
        metrics.begin_call(10).finish_success(10);
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.successful_requests, 0);
    }
}
