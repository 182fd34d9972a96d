//! Metrics for answer streams
//!
//! # Metrics
//!
//! - `answer_streams_total`: Counter of opened streams, by kind (root/follow_up)
//! - `answer_stream_outcomes_total`: Counter of stream outcomes
//!   (answered, rate_limited, offline, server_error, superseded)
//! - `answer_stream_duration_seconds`: Histogram of stream duration by outcome
//! - `answer_stream_deltas`: Histogram of content deltas received per stream
//! - `answer_streams_active`: Gauge of streams currently open
//!
//! Values go to whatever recorder is installed. With the `prometheus`
//! feature, [`init_metrics_exporter`] installs a Prometheus exporter.

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics collection for a single answer stream
///
/// Recording is idempotent: only the first `record_outcome` counts, and a
/// stream dropped without an outcome still releases the active gauge.
///
/// # Examples
///
/// ```
/// use cliniq::session::metrics::StreamMetrics;
///
/// let metrics = StreamMetrics::new(false);
/// metrics.record_delta();
/// metrics.record_outcome("answered");
/// assert_eq!(metrics.deltas(), 1);
/// ```
#[derive(Debug)]
pub struct StreamMetrics {
    kind: &'static str,
    start: Instant,
    deltas: AtomicU64,
    recorded: AtomicBool,
}

impl StreamMetrics {
    /// Starts tracking a stream; increments the opened counter and active gauge
    pub fn new(follow_up: bool) -> Self {
        let kind = if follow_up { "follow_up" } else { "root" };
        increment_counter!("answer_streams_total", "kind" => kind);
        increment_gauge!("answer_streams_active", 1.0);

        Self {
            kind,
            start: Instant::now(),
            deltas: AtomicU64::new(0),
            recorded: AtomicBool::new(false),
        }
    }

    /// Counts one content delta
    pub fn record_delta(&self) {
        self.deltas.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the terminal outcome of the stream
    pub fn record_outcome(&self, outcome: &str) {
        if self.recorded.swap(true, Ordering::SeqCst) {
            return;
        }

        histogram!(
            "answer_stream_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "kind" => self.kind,
            "outcome" => outcome.to_string()
        );

        histogram!(
            "answer_stream_deltas",
            self.deltas() as f64,
            "kind" => self.kind
        );

        increment_counter!(
            "answer_stream_outcomes_total",
            "kind" => self.kind,
            "outcome" => outcome.to_string()
        );

        decrement_gauge!("answer_streams_active", 1.0);
    }

    pub fn deltas(&self) -> u64 {
        self.deltas.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_recorded(&self) -> bool {
        self.recorded.load(Ordering::SeqCst)
    }
}

impl Drop for StreamMetrics {
    fn drop(&mut self) {
        if !self.recorded.load(Ordering::SeqCst) {
            decrement_gauge!("answer_streams_active", 1.0);
        }
    }
}

/// Installs the Prometheus exporter when the `prometheus` feature is enabled
///
/// Without the feature this is a no-op.
///
/// # Examples
///
/// ```
/// use cliniq::session::metrics::init_metrics_exporter;
///
/// init_metrics_exporter();
/// ```
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        if let Err(e) = PrometheusBuilder::new().install() {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcome_once() {
        let metrics = StreamMetrics::new(false);
        metrics.record_outcome("answered");
        assert!(metrics.is_recorded());
        // Ignored
        metrics.record_outcome("offline");
        assert!(metrics.is_recorded());
    }

    #[test]
    fn test_delta_counting() {
        let metrics = StreamMetrics::new(true);
        for _ in 0..3 {
            metrics.record_delta();
        }
        assert_eq!(metrics.deltas(), 3);
    }

    #[test]
    fn test_drop_without_outcome() {
        let metrics = StreamMetrics::new(false);
        assert!(!metrics.is_recorded());
        drop(metrics);
    }

    #[test]
    fn test_elapsed_increases() {
        let metrics = StreamMetrics::new(false);
        let t1 = metrics.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert!(metrics.elapsed() > t1);
    }
}
