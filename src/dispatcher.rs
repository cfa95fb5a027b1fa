//! Asynchronous side effects of a scoring request.
//!
//! Jobs go through a bounded queue that is drained by a single dispatch loop.
//! The loop caps the number of jobs running at once with a semaphore and runs
//! each job on the blocking pool; notification jobs also run under a deadline.
//! A permit is held until the blocking work returns, timed out or not.
//! Submission never waits: when the queue is full the job is dropped and
//! counted.

use crate::cache::HistoricalRateCache;
use crate::config::DispatcherConfig;
use crate::error::JobError;
use crate::metrics::PipelineMetrics;
use crate::notify::{EmailNotifier, NotifyOutcome, SlackNotifier};
use crate::repository::{persist_upload, TransactionRepository};
use crate::types::dataset::TabularDataset;
use crate::types::scoring::{ScoringResult, SeverityLevel};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A unit of background work. Jobs are independent and never retried.
#[derive(Debug, Clone)]
pub enum SideEffectJob {
    Persist {
        dataset: Arc<TabularDataset>,
        source_name: String,
    },
    RefreshHistoricalRate,
    NotifySlack {
        level: SeverityLevel,
        message: String,
    },
    NotifyEmail {
        subject: String,
        body: String,
    },
}

impl SideEffectJob {
    pub fn kind(&self) -> &'static str {
        match self {
            SideEffectJob::Persist { .. } => "persist",
            SideEffectJob::RefreshHistoricalRate => "refresh_historical_rate",
            SideEffectJob::NotifySlack { .. } => "notify_slack",
            SideEffectJob::NotifyEmail { .. } => "notify_email",
        }
    }

    /// Notification jobs talk to external services and run under the
    /// dispatcher's deadline; persistence and refreshes run to completion.
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            SideEffectJob::NotifySlack { .. } | SideEffectJob::NotifyEmail { .. }
        )
    }
}

/// Jobs owed for a scored dataset: always persist and refresh; Medium adds a
/// Slack alert; Severe adds a Slack alert and an email.
pub fn plan_jobs(
    result: &ScoringResult,
    dataset: Arc<TabularDataset>,
    source_name: &str,
    email_subject: &str,
) -> Vec<SideEffectJob> {
    let mut jobs = vec![
        SideEffectJob::Persist {
            dataset,
            source_name: source_name.to_string(),
        },
        SideEffectJob::RefreshHistoricalRate,
    ];

    let message = result.alert_message();
    match result.severity_level {
        SeverityLevel::Low => {}
        SeverityLevel::Medium => jobs.push(SideEffectJob::NotifySlack {
            level: SeverityLevel::Medium,
            message,
        }),
        SeverityLevel::Severe => {
            jobs.push(SideEffectJob::NotifySlack {
                level: SeverityLevel::Severe,
                message: message.clone(),
            });
            jobs.push(SideEffectJob::NotifyEmail {
                subject: email_subject.to_string(),
                body: message,
            });
        }
    }

    jobs
}

/// Executes jobs against the repository, cache and notifiers. Blocking.
pub struct JobExecutor {
    repo: Arc<dyn TransactionRepository>,
    cache: Arc<HistoricalRateCache>,
    slack: Arc<dyn SlackNotifier>,
    email: Arc<dyn EmailNotifier>,
}

impl JobExecutor {
    pub fn new(
        repo: Arc<dyn TransactionRepository>,
        cache: Arc<HistoricalRateCache>,
        slack: Arc<dyn SlackNotifier>,
        email: Arc<dyn EmailNotifier>,
    ) -> Self {
        Self {
            repo,
            cache,
            slack,
            email,
        }
    }

    pub fn execute(&self, job: &SideEffectJob) -> Result<(), JobError> {
        match job {
            SideEffectJob::Persist {
                dataset,
                source_name,
            } => {
                let table = persist_upload(self.repo.as_ref(), dataset, source_name, Utc::now())?;
                info!(
                    table = %table,
                    source = %source_name,
                    rows = dataset.len(),
                    labeled = dataset.is_labeled(),
                    "Persisted uploaded dataset"
                );
                Ok(())
            }
            SideEffectJob::RefreshHistoricalRate => {
                self.cache.refresh().ok_or(JobError::RateUnavailable)?;
                Ok(())
            }
            SideEffectJob::NotifySlack { level, message } => {
                log_outcome("slack", self.slack.notify(*level, message)?);
                Ok(())
            }
            SideEffectJob::NotifyEmail { subject, body } => {
                log_outcome("email", self.email.send(subject, body)?);
                Ok(())
            }
        }
    }
}

fn log_outcome(channel: &str, outcome: NotifyOutcome) {
    match outcome {
        NotifyOutcome::Delivered => debug!(channel, "Notification delivered"),
        NotifyOutcome::Skipped => debug!(channel, "Notification channel not configured"),
    }
}

/// Accepted-but-unfinished job count, with a wakeup when it drops to zero.
#[derive(Default)]
struct JobTracker {
    outstanding: AtomicUsize,
    idle: Notify,
}

impl JobTracker {
    fn begin(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    async fn idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // register before checking so a finish in between is not missed
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Handle for submitting side-effect jobs.
pub struct SideEffectDispatcher {
    sender: mpsc::Sender<SideEffectJob>,
    queued: Arc<AtomicUsize>,
    tracker: Arc<JobTracker>,
    metrics: Arc<PipelineMetrics>,
}

impl SideEffectDispatcher {
    /// Create the queue without a consumer. `start` is the usual entry point.
    pub fn new(
        config: &DispatcherConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> (Self, mpsc::Receiver<SideEffectJob>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let dispatcher = Self {
            sender,
            queued: Arc::new(AtomicUsize::new(0)),
            tracker: Arc::new(JobTracker::default()),
            metrics,
        };
        (dispatcher, receiver)
    }

    /// Create the queue and spawn its dispatch loop on the current runtime.
    pub fn start(
        executor: Arc<JobExecutor>,
        config: &DispatcherConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, receiver) = Self::new(config, metrics.clone());
        let worker = DispatchLoop {
            receiver,
            executor,
            semaphore: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            notify_timeout: Duration::from_millis(config.job_timeout_ms.max(1)),
            queued: dispatcher.queued.clone(),
            tracker: dispatcher.tracker.clone(),
            metrics,
        };
        info!(
            queue_capacity = config.queue_capacity,
            max_in_flight = config.max_in_flight,
            job_timeout_ms = config.job_timeout_ms,
            "Side-effect dispatcher started"
        );
        (dispatcher, tokio::spawn(worker.run()))
    }

    /// Enqueue a job without waiting. Returns false when the job was dropped.
    pub fn submit(&self, job: SideEffectJob) -> bool {
        // count before sending so the loop never sees an uncounted job
        self.tracker.begin();
        let depth = self.queued.fetch_add(1, Ordering::SeqCst) + 1;

        match self.sender.try_send(job) {
            Ok(()) => {
                self.metrics.record_job_enqueued();
                self.metrics.set_queue_depth(depth);
                true
            }
            Err(err) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                self.tracker.finish();
                self.metrics.record_job_dropped();
                let (reason, job) = match err {
                    TrySendError::Full(job) => ("queue full", job),
                    TrySendError::Closed(job) => ("dispatcher stopped", job),
                };
                warn!(job = job.kind(), reason, "Dropping side-effect job");
                false
            }
        }
    }

    /// Submit every job; returns how many were accepted.
    pub fn dispatch(&self, jobs: Vec<SideEffectJob>) -> usize {
        jobs.into_iter()
            .map(|job| self.submit(job))
            .filter(|&accepted| accepted)
            .count()
    }

    /// Jobs accepted but not yet finished
    pub fn outstanding(&self) -> usize {
        self.tracker.outstanding()
    }

    /// Wait until every accepted job has finished or timed out. Returns false
    /// if `limit` elapsed first.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.tracker.idle()).await.is_ok()
    }
}

struct DispatchLoop {
    receiver: mpsc::Receiver<SideEffectJob>,
    executor: Arc<JobExecutor>,
    semaphore: Arc<Semaphore>,
    notify_timeout: Duration,
    queued: Arc<AtomicUsize>,
    tracker: Arc<JobTracker>,
    metrics: Arc<PipelineMetrics>,
}

impl DispatchLoop {
    async fn run(mut self) {
        while let Some(job) = self.receiver.recv().await {
            // Acquire permit (limits concurrent jobs)
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                break;
            };
            let depth = self.queued.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            self.metrics.set_queue_depth(depth);

            let executor = self.executor.clone();
            let metrics = self.metrics.clone();
            let tracker = self.tracker.clone();
            let deadline = job.is_notification().then_some(self.notify_timeout);

            tokio::spawn(async move {
                let kind = job.kind();
                // The permit lives as long as the blocking work, so a job that
                // outlives its deadline still occupies its slot.
                let task = tokio::task::spawn_blocking(move || {
                    let outcome = executor.execute(&job);
                    drop(permit);
                    outcome
                });

                let outcome = match deadline {
                    Some(deadline) => tokio::time::timeout(deadline, task).await,
                    None => Ok(task.await),
                };
                match outcome {
                    Ok(Ok(Ok(()))) => {
                        metrics.record_job_completed();
                        debug!(job = kind, "Side-effect job completed");
                    }
                    Ok(Ok(Err(e))) => {
                        metrics.record_job_failed();
                        warn!(job = kind, error = %e, "Side-effect job failed");
                    }
                    Ok(Err(e)) => {
                        metrics.record_job_failed();
                        error!(job = kind, error = %e, "Side-effect job panicked");
                    }
                    Err(_) => {
                        metrics.record_job_timed_out();
                        warn!(
                            job = kind,
                            timeout_ms = deadline.unwrap_or_default().as_millis() as u64,
                            "Side-effect job timed out"
                        );
                    }
                }

                tracker.finish();
            });
        }
        debug!("Side-effect queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HistoricalRateCache;
    use crate::testing::{
        labeled_row, scoring_row, InMemoryRepository, ManualClock, RecordingEmail, RecordingSlack,
    };

    struct Harness {
        repo: Arc<InMemoryRepository>,
        slack: Arc<RecordingSlack>,
        email: Arc<RecordingEmail>,
        metrics: Arc<PipelineMetrics>,
        executor: Arc<JobExecutor>,
    }

    fn harness() -> Harness {
        let repo = Arc::new(InMemoryRepository::new());
        let cache = Arc::new(HistoricalRateCache::new(
            repo.clone(),
            Arc::new(ManualClock::new()),
            chrono::Duration::seconds(300),
        ));
        let slack = Arc::new(RecordingSlack::new());
        let email = Arc::new(RecordingEmail::new());
        let executor = Arc::new(JobExecutor::new(
            repo.clone(),
            cache,
            slack.clone(),
            email.clone(),
        ));
        Harness {
            repo,
            slack,
            email,
            metrics: Arc::new(PipelineMetrics::new()),
            executor,
        }
    }

    fn result(level: SeverityLevel, severity: f64) -> ScoringResult {
        ScoringResult {
            probabilities: vec![severity],
            row_count: 1,
            fraud_count: usize::from(severity >= 0.5),
            fraud_rate: if severity >= 0.5 { 100.0 } else { 0.0 },
            severity,
            severity_level: level,
            suspicious: None,
        }
    }

    fn kinds(jobs: &[SideEffectJob]) -> Vec<&'static str> {
        jobs.iter().map(SideEffectJob::kind).collect()
    }

    #[test]
    fn test_plan_by_severity() {
        let dataset = Arc::new(TabularDataset::new(vec![scoring_row(1)]));

        let low = plan_jobs(&result(SeverityLevel::Low, 0.2), dataset.clone(), "a.csv", "S");
        assert_eq!(kinds(&low), vec!["persist", "refresh_historical_rate"]);

        let medium = plan_jobs(
            &result(SeverityLevel::Medium, 0.5),
            dataset.clone(),
            "a.csv",
            "S",
        );
        assert_eq!(
            kinds(&medium),
            vec!["persist", "refresh_historical_rate", "notify_slack"]
        );

        let severe = plan_jobs(
            &result(SeverityLevel::Severe, 0.95),
            dataset,
            "a.csv",
            "Severe Fraud Alert",
        );
        assert_eq!(
            kinds(&severe),
            vec!["persist", "refresh_historical_rate", "notify_slack", "notify_email"]
        );
        match &severe[3] {
            SideEffectJob::NotifyEmail { subject, body } => {
                assert_eq!(subject, "Severe Fraud Alert");
                assert_eq!(body, "Severity: 0.95 (Severe)");
            }
            other => panic!("unexpected job {:?}", other),
        }
        let notifications: Vec<bool> = severe.iter().map(SideEffectJob::is_notification).collect();
        assert_eq!(notifications, vec![false, false, true, true]);
    }

    #[test]
    fn test_execute_jobs() {
        let h = harness();
        let dataset = Arc::new(TabularDataset::new(vec![labeled_row(1, 1), labeled_row(2, 0)]));

        h.executor
            .execute(&SideEffectJob::Persist {
                dataset,
                source_name: "bank.csv".to_string(),
            })
            .unwrap();
        h.executor
            .execute(&SideEffectJob::NotifySlack {
                level: SeverityLevel::Medium,
                message: "m".to_string(),
            })
            .unwrap();

        assert_eq!(h.repo.uploads().len(), 1);
        assert_eq!(h.slack.calls(), vec![(SeverityLevel::Medium, "m".to_string())]);
        h.executor.execute(&SideEffectJob::RefreshHistoricalRate).unwrap();
    }

    #[test]
    fn test_refresh_without_data_fails() {
        let h = harness();
        assert!(matches!(
            h.executor.execute(&SideEffectJob::RefreshHistoricalRate),
            Err(JobError::RateUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_dispatch_runs_all_jobs() {
        let h = harness();
        let (dispatcher, _worker) = SideEffectDispatcher::start(
            h.executor.clone(),
            &DispatcherConfig::default(),
            h.metrics.clone(),
        );
        let dataset = Arc::new(TabularDataset::new(vec![labeled_row(1, 1)]));

        let jobs = plan_jobs(
            &result(SeverityLevel::Severe, 0.9),
            dataset,
            "x.csv",
            "Severe Fraud Alert",
        );
        assert_eq!(dispatcher.dispatch(jobs), 4);
        assert!(dispatcher.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(h.slack.calls().len(), 1);
        assert_eq!(h.email.calls().len(), 1);
        assert_eq!(h.repo.uploads().len(), 1);
        let stats = h.metrics.job_stats();
        assert_eq!(stats.enqueued, 4);
        assert_eq!(stats.completed + stats.failed, 4);
        assert_eq!(stats.queue_depth, 0);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let h = harness();
        h.slack.fail(true);
        let (dispatcher, _worker) = SideEffectDispatcher::start(
            h.executor.clone(),
            &DispatcherConfig::default(),
            h.metrics.clone(),
        );

        assert!(dispatcher.submit(SideEffectJob::NotifySlack {
            level: SeverityLevel::Severe,
            message: "m".to_string(),
        }));
        assert!(dispatcher.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(h.metrics.job_stats().failed, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_waiting() {
        let h = harness();
        let config = DispatcherConfig {
            queue_capacity: 1,
            ..DispatcherConfig::default()
        };
        // no consumer running, so the second job finds the queue full
        let (dispatcher, _receiver) = SideEffectDispatcher::new(&config, h.metrics.clone());

        assert!(dispatcher.submit(SideEffectJob::RefreshHistoricalRate));
        assert!(!dispatcher.submit(SideEffectJob::RefreshHistoricalRate));

        let stats = h.metrics.job_stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(dispatcher.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_slow_job_times_out() {
        let h = harness();
        h.slack.delay(Duration::from_millis(300));
        let config = DispatcherConfig {
            job_timeout_ms: 50,
            ..DispatcherConfig::default()
        };
        let (dispatcher, _worker) =
            SideEffectDispatcher::start(h.executor.clone(), &config, h.metrics.clone());

        dispatcher.submit(SideEffectJob::NotifySlack {
            level: SeverityLevel::Medium,
            message: "slow".to_string(),
        });
        assert!(dispatcher.wait_idle(Duration::from_secs(5)).await);

        let stats = h.metrics.job_stats();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
    }

    // A timed-out job keeps its slot until the blocking work returns, so the
    // in-flight limit holds even when every job overruns its deadline.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timed_out_jobs_stay_within_limit() {
        let h = harness();
        h.slack.delay(Duration::from_millis(100));
        let config = DispatcherConfig {
            max_in_flight: 1,
            job_timeout_ms: 20,
            ..DispatcherConfig::default()
        };
        let (dispatcher, _worker) =
            SideEffectDispatcher::start(h.executor.clone(), &config, h.metrics.clone());

        for i in 0..4 {
            assert!(dispatcher.submit(SideEffectJob::NotifySlack {
                level: SeverityLevel::Medium,
                message: format!("slow {}", i),
            }));
        }
        assert!(dispatcher.wait_idle(Duration::from_secs(5)).await);
        // let the last detached call return
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(h.slack.peak_concurrency(), 1);
        assert_eq!(h.slack.calls().len(), 4);
        assert_eq!(h.metrics.job_stats().timed_out, 4);
    }

    #[tokio::test]
    async fn test_wait_idle_reports_busy_dispatcher() {
        let h = harness();
        h.slack.delay(Duration::from_millis(200));
        let (dispatcher, _worker) = SideEffectDispatcher::start(
            h.executor.clone(),
            &DispatcherConfig::default(),
            h.metrics.clone(),
        );

        assert!(dispatcher.wait_idle(Duration::from_millis(10)).await);
        dispatcher.submit(SideEffectJob::NotifySlack {
            level: SeverityLevel::Medium,
            message: "busy".to_string(),
        });

        assert!(!dispatcher.wait_idle(Duration::from_millis(20)).await);
        assert!(dispatcher.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(dispatcher.outstanding(), 0);
    }
}
