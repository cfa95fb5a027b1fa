//! Performance metrics and statistics tracking for the fraud scoring service.

use crate::types::scoring::{ScoringResult, SeverityLevel};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for the scoring path and the side-effect queue
pub struct PipelineMetrics {
    /// Requests scored successfully
    pub requests_scored: AtomicU64,
    /// Requests rejected with a scoring error or undecodable payload
    pub requests_rejected: AtomicU64,
    /// Total rows scored
    pub rows_scored: AtomicU64,
    /// Scored batches by severity level
    results_by_level: RwLock<HashMap<SeverityLevel, u64>>,
    /// Scoring times (in microseconds)
    scoring_times: RwLock<Vec<u64>>,
    jobs_enqueued: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_dropped: AtomicU64,
    jobs_timed_out: AtomicU64,
    queue_depth: AtomicU64,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            requests_scored: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            results_by_level: RwLock::new(HashMap::new()),
            scoring_times: RwLock::new(Vec::with_capacity(1000)),
            jobs_enqueued: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_dropped: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a scored batch
    pub fn record_scored(&self, scoring_time: Duration, result: &ScoringResult) {
        self.requests_scored.fetch_add(1, Ordering::Relaxed);
        self.rows_scored
            .fetch_add(result.row_count as u64, Ordering::Relaxed);

        {
            let mut times = self.scoring_times.write();
            times.push(scoring_time.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        *self
            .results_by_level
            .write()
            .entry(result.severity_level)
            .or_insert(0) += 1;
    }

    pub fn record_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_enqueued(&self) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A job that exceeded its timeout. Also counted as failed.
    pub fn record_job_timed_out(&self) {
        self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
        self.record_job_failed();
    }

    pub fn record_job_dropped(&self) {
        self.jobs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    /// Snapshot of the side-effect job counters
    pub fn job_stats(&self) -> JobStats {
        JobStats {
            enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            completed: self.jobs_completed.load(Ordering::Relaxed),
            failed: self.jobs_failed.load(Ordering::Relaxed),
            dropped: self.jobs_dropped.load(Ordering::Relaxed),
            timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }

    /// Get scoring time statistics
    pub fn get_scoring_stats(&self) -> ProcessingStats {
        let mut sorted: Vec<u64> = self.scoring_times.read().clone();
        if sorted.is_empty() {
            return ProcessingStats::default();
        }
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[((count as f64 * 0.95) as usize).min(count - 1)],
            p99_us: sorted[((count as f64 * 0.99) as usize).min(count - 1)],
            max_us: *sorted.last().unwrap_or(&0),
        }
    }

    /// Get current throughput (requests per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.requests_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get scored batches by severity level
    pub fn get_results_by_level(&self) -> HashMap<SeverityLevel, u64> {
        self.results_by_level.read().clone()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let scored = self.requests_scored.load(Ordering::Relaxed);
        let rejected = self.requests_rejected.load(Ordering::Relaxed);
        let rows = self.rows_scored.load(Ordering::Relaxed);
        let scoring = self.get_scoring_stats();
        let jobs = self.job_stats();
        let by_level = self.get_results_by_level();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            FRAUD SCORING SERVICE - METRICS SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Requests Scored: {:>8}  │  Rejected: {:>8}  │  Rows: {:>10} ║",
            scored, rejected, rows
        );
        info!(
            "║ Throughput: {:>6.1} req/s                                        ║",
            self.get_throughput()
        );
        info!(
            "║ Scoring Time (μs): mean={:>6} p50={:>6} p95={:>6} p99={:>6} ║",
            scoring.mean_us, scoring.p50_us, scoring.p95_us, scoring.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Results by Severity:                                         ║");
        for level in [SeverityLevel::Low, SeverityLevel::Medium, SeverityLevel::Severe] {
            let count = by_level.get(&level).copied().unwrap_or(0);
            let pct = if scored > 0 {
                (count as f64 / scored as f64) * 100.0
            } else {
                0.0
            };
            info!(
                "║   {:10}: {:>6} ({:>5.1}%)                                ║",
                level, count, pct
            );
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Jobs: enqueued={} completed={} failed={} timed_out={} dropped={} depth={}",
            jobs.enqueued,
            jobs.completed,
            jobs.failed,
            jobs.timed_out,
            jobs.dropped,
            jobs.queue_depth
        );
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Side-effect job counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobStats {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub timed_out: u64,
    pub queue_depth: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
