//! Process-wide service metrics, updated from the run finalizer.
//!
//! Guarded by a mutex so concurrent runs update atomically; the average is
//! an arithmetic mean over completed runs (sum kept separately so the mean
//! does not drift).

use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    pub total_ingestions: u64,
    pub total_records_processed: u64,
    pub total_errors: u64,
    pub average_processing_ms: f64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    ingestions: u64,
    records_processed: u64,
    errors: u64,
    total_processing_ms: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsCell {
    inner: Mutex<MetricsInner>,
}

impl MetricsCell {
    /// Fold a completed run into the totals.
    pub(crate) fn record_run(&self, processing_ms: u64, records: usize, failed: usize) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.ingestions += 1;
        inner.records_processed += records as u64;
        inner.errors += failed as u64;
        inner.total_processing_ms += processing_ms;
    }

    /// A run that aborted before completing still counts as an error.
    pub(crate) fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.errors += 1;
    }

    pub(crate) fn snapshot(&self) -> ServiceMetrics {
        let inner = self.inner.lock().expect("metrics mutex poisoned");
        let average = if inner.ingestions == 0 {
            0.0
        } else {
            inner.total_processing_ms as f64 / inner.ingestions as f64
        };
        ServiceMetrics {
            total_ingestions: inner.ingestions,
            total_records_processed: inner.records_processed,
            total_errors: inner.errors,
            average_processing_ms: average,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_mean_over_completed_runs() {
        let cell = MetricsCell::default();
        cell.record_run(100, 10, 0);
        cell.record_run(300, 5, 2);

        let snap = cell.snapshot();
        assert_eq!(snap.total_ingestions, 2);
        assert_eq!(snap.total_records_processed, 15);
        assert_eq!(snap.total_errors, 2);
        assert!((snap.average_processing_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn aborted_runs_only_move_the_error_counter() {
        let cell = MetricsCell::default();
        cell.record_failure();

        let snap = cell.snapshot();
        assert_eq!(snap.total_ingestions, 0);
        assert_eq!(snap.total_errors, 1);
        assert_eq!(snap.average_processing_ms, 0.0);
    }
}
