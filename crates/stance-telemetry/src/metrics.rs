//! Metrics collection and reporting

use stance_core::{ErrorKind, StanceLabel};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Register metric descriptions with the installed recorder
pub fn describe_metrics() {
    metrics::describe_counter!(
        "stance_predictions_total",
        "Total number of successful predictions by label"
    );
    metrics::describe_counter!(
        "stance_prediction_errors_total",
        "Total number of failed predictions by error kind"
    );
    metrics::describe_counter!(
        "stance_degraded_predictions_total",
        "Predictions computed without a dependency parse"
    );
    metrics::describe_histogram!(
        "stance_prediction_latency_us",
        metrics::Unit::Microseconds,
        "End-to-end prediction latency"
    );
}

/// In-process metrics for the inference engine.
///
/// Every update is also forwarded to the `metrics` facade.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    predictions: [AtomicU64; StanceLabel::COUNT],
    errors: AtomicU64,
    embedding_errors: AtomicU64,
    degraded: AtomicU64,
    total_latency_us: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                predictions: Default::default(),
                errors: AtomicU64::new(0),
                embedding_errors: AtomicU64::new(0),
                degraded: AtomicU64::new(0),
                total_latency_us: AtomicU64::new(0),
            }),
        }
    }

    /// Record a successful prediction
    pub fn record_prediction(&self, label: StanceLabel, latency_us: u64, degraded: bool) {
        self.inner.predictions[label.index()].fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);

        metrics::counter!("stance_predictions_total", "label" => label.as_str()).increment(1);
        metrics::histogram!("stance_prediction_latency_us").record(latency_us as f64);

        if degraded {
            self.inner.degraded.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("stance_degraded_predictions_total").increment(1);
        }
    }

    /// Record a failed prediction
    pub fn record_error(&self, kind: ErrorKind) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
        if kind == ErrorKind::EmbeddingProvider {
            self.inner.embedding_errors.fetch_add(1, Ordering::Relaxed);
        }
        metrics::counter!("stance_prediction_errors_total", "kind" => kind.as_str()).increment(1);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut predictions = [0u64; StanceLabel::COUNT];
        for (slot, counter) in predictions.iter_mut().zip(self.inner.predictions.iter()) {
            *slot = counter.load(Ordering::Relaxed);
        }
        MetricsSnapshot {
            predictions,
            errors: self.inner.errors.load(Ordering::Relaxed),
            embedding_errors: self.inner.embedding_errors.load(Ordering::Relaxed),
            degraded: self.inner.degraded.load(Ordering::Relaxed),
            total_latency_us: self.inner.total_latency_us.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Successful predictions per label, in canonical class order
    pub predictions: [u64; StanceLabel::COUNT],
    pub errors: u64,
    pub embedding_errors: u64,
    pub degraded: u64,
    pub total_latency_us: u64,
}

impl MetricsSnapshot {
    pub fn total_predictions(&self) -> u64 {
        self.predictions.iter().sum()
    }

    pub fn predictions_for(&self, label: StanceLabel) -> u64 {
        self.predictions[label.index()]
    }

    /// Average latency per successful prediction
    pub fn avg_latency_us(&self) -> u64 {
        let total = self.total_predictions();
        if total == 0 {
            0
        } else {
            self.total_latency_us / total
        }
    }

    /// Share of requests that failed
    pub fn error_rate(&self) -> f64 {
        let attempts = self.total_predictions() + self.errors;
        if attempts == 0 {
            0.0
        } else {
            self.errors as f64 / attempts as f64
        }
    }
}
