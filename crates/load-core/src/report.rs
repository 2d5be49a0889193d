//! Run totals and throughput reporting.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters shared by the workers, read by the periodic progress
/// reporter while the run is in flight.
#[derive(Debug, Default)]
pub struct RunCounters {
    rows: AtomicU64,
    metrics: AtomicU64,
}

impl RunCounters {
    pub fn record(&self, metric_count: u64, row_count: u64) {
        self.metrics.fetch_add(metric_count, Ordering::Relaxed);
        self.rows.fetch_add(row_count, Ordering::Relaxed);
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> u64 {
        self.metrics.load(Ordering::Relaxed)
    }
}

/// Totals accumulated by one worker.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub batches: u64,
    pub metric_count: u64,
    pub row_count: u64,
}

impl WorkerStats {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            ..Default::default()
        }
    }
}

/// Final result of a load run. Only produced when every worker and
/// the producer completed cleanly; a failed run reports its error
/// instead of partial totals.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub points: u64,
    pub batches: u64,
    pub metric_count: u64,
    pub row_count: u64,
    pub duration: Duration,
    pub workers: Vec<WorkerStats>,
}

impl LoadReport {
    pub fn new(points: u64, duration: Duration, workers: Vec<WorkerStats>) -> Self {
        let mut report = Self {
            points,
            batches: 0,
            metric_count: 0,
            row_count: 0,
            duration,
            workers,
        };
        for w in &report.workers {
            report.batches += w.batches;
            report.metric_count += w.metric_count;
            report.row_count += w.row_count;
        }
        report
    }

    pub fn rows_per_second(&self) -> f64 {
        per_second(self.row_count, self.duration)
    }

    pub fn metrics_per_second(&self) -> f64 {
        per_second(self.metric_count, self.duration)
    }

    /// Human-readable run summary.
    pub fn summary(&self) -> String {
        format!(
            "loaded {} rows ({} metrics) in {:.3}s: {:.2} rows/sec, {:.2} metrics/sec, {} batches across {} workers",
            self.row_count,
            self.metric_count,
            self.duration.as_secs_f64(),
            self.rows_per_second(),
            self.metrics_per_second(),
            self.batches,
            self.workers.len(),
        )
    }
}

fn per_second(count: u64, duration: Duration) -> f64 {
    if duration.as_secs_f64() > 0.0 {
        count as f64 / duration.as_secs_f64()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_aggregates_worker_totals() {
        let workers = vec![
            WorkerStats {
                worker_id: 0,
                batches: 3,
                metric_count: 300,
                row_count: 30,
            },
            WorkerStats {
                worker_id: 1,
                batches: 2,
                metric_count: 200,
                row_count: 20,
            },
        ];
        let report = LoadReport::new(50, Duration::from_secs(5), workers);
        assert_eq!(report.batches, 5);
        assert_eq!(report.metric_count, 500);
        assert_eq!(report.row_count, 50);
        assert_eq!(report.rows_per_second(), 10.0);
        assert_eq!(report.metrics_per_second(), 100.0);
    }

    #[test]
    fn test_zero_duration_rates() {
        let report = LoadReport::new(0, Duration::ZERO, vec![]);
        assert_eq!(report.rows_per_second(), 0.0);
    }

    #[test]
    fn test_counters_accumulate() {
        let counters = RunCounters::default();
        counters.record(10, 1);
        counters.record(20, 2);
        assert_eq!(counters.metrics(), 30);
        assert_eq!(counters.rows(), 3);
    }
}
