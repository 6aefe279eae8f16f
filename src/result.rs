//! Per-session counters and the final test result.

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ErrorRecord;

/// Counters owned by a single user/session task until it completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutcome {
    pub requests: u64,
    pub successful: u64,
    pub failed: u64,

    /// Latency of each successful request, in seconds.
    pub latencies: Vec<f64>,
    pub errors: Vec<ErrorRecord>,
}

impl SessionOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, latency_secs: f64) {
        self.requests += 1;
        self.successful += 1;
        self.latencies.push(latency_secs);
    }

    pub fn record_failure(&mut self) {
        self.requests += 1;
        self.failed += 1;
    }

    pub fn push_error(&mut self, record: ErrorRecord) {
        self.errors.push(record);
    }

    /// Fold a completed session into this aggregate.
    pub fn merge(&mut self, other: SessionOutcome) {
        self.requests += other.requests;
        self.successful += other.successful;
        self.failed += other.failed;
        self.latencies.extend(other.latencies);
        self.errors.extend(other.errors);
    }
}

/// Latency summary in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub total: f64,
    pub max: f64,
    pub min: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencyStats {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let total: f64 = samples.iter().sum();
        let max = samples.iter().cloned().fold(f64::MIN, f64::max);
        let min = samples.iter().cloned().fold(f64::MAX, f64::min);
        let avg = total / samples.len() as f64;
        let (p50, p95, p99) = percentiles(samples);

        Self {
            total,
            max,
            min,
            avg,
            p50,
            p95,
            p99,
        }
    }
}

/// p50/p95/p99 via an HDR histogram with microsecond resolution.
fn percentiles(samples: &[f64]) -> (f64, f64, f64) {
    // 1µs .. 1h, 3 significant digits.
    let mut histogram = match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, "Failed to create latency histogram");
            return (0.0, 0.0, 0.0);
        }
    };

    for &secs in samples {
        let micros = (secs * 1_000_000.0).round().max(1.0) as u64;
        histogram.saturating_record(micros);
    }

    let at = |q: f64| histogram.value_at_quantile(q) as f64 / 1_000_000.0;
    (at(0.50), at(0.95), at(0.99))
}

/// The record handed to the result sink once all sessions finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub worker_id: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_latency: f64,
    pub max_latency: f64,
    pub min_latency: f64,
    pub avg_latency: f64,
    pub p50_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub error_details: Vec<ErrorRecord>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TestResult {
    pub fn from_outcome(
        test_id: impl Into<String>,
        worker_id: impl Into<String>,
        outcome: SessionOutcome,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        let stats = LatencyStats::from_samples(&outcome.latencies);
        Self {
            test_id: test_id.into(),
            worker_id: worker_id.into(),
            total_requests: outcome.requests,
            successful_requests: outcome.successful,
            failed_requests: outcome.failed,
            total_latency: stats.total,
            max_latency: stats.max,
            min_latency: stats.min,
            avg_latency: stats.avg,
            p50_latency: stats.p50,
            p95_latency: stats.p95,
            p99_latency: stats.p99,
            error_details: outcome.errors,
            start_time,
            end_time,
        }
    }

    /// Percentage of successful requests; 0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64 * 100.0
    }

    /// Percentage of failed requests; 0 when nothing ran.
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64 * 100.0
    }
}
