//! The fraud scoring service: model bootstrap, request scoring and side-effect
//! dispatch wired together.

use crate::cache::{Clock, HistoricalRateCache};
use crate::config::AppConfig;
use crate::dispatcher::{plan_jobs, JobExecutor, SideEffectDispatcher, SideEffectJob};
use crate::error::{RepositoryError, ScoringError};
use crate::metrics::PipelineMetrics;
use crate::models::{
    ArtifactStore, FraudClassifier, ModelStore, ModelTrainer, ScoringService, Smote,
};
use crate::notify::{EmailNotifier, SlackNotifier};
use crate::repository::TransactionRepository;
use crate::types::dataset::TabularDataset;
use crate::types::scoring::{ScoringReport, ScoringRequest, ScoringResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// External collaborators of the service
pub struct ServiceDeps {
    pub repo: Arc<dyn TransactionRepository>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub slack: Arc<dyn SlackNotifier>,
    pub email: Arc<dyn EmailNotifier>,
    pub clock: Arc<dyn Clock>,
}

pub struct FraudService {
    repo: Arc<dyn TransactionRepository>,
    model_store: Arc<ModelStore>,
    scoring: ScoringService,
    cache: Arc<HistoricalRateCache>,
    dispatcher: SideEffectDispatcher,
    worker: JoinHandle<()>,
    metrics: Arc<PipelineMetrics>,
    email_subject: String,
}

impl FraudService {
    /// Bring the service up: ensure the model (training if no artifact exists),
    /// start the side-effect dispatcher and queue a first historical-rate
    /// refresh.
    ///
    /// Blocks while training; must run inside a tokio runtime context.
    pub fn start(config: &AppConfig, deps: ServiceDeps, metrics: Arc<PipelineMetrics>) -> Self {
        let model_store = Arc::new(ModelStore::new(
            deps.artifacts.clone(),
            &config.model.path,
            trainer(config),
        ));
        let model = model_store.ensure_model(deps.repo.as_ref());
        if model.is_none() {
            warn!(location = %config.model.path, "Scoring disabled, model unavailable");
        }
        Self::assemble(config, deps, model_store, model, metrics)
    }

    /// Start with a classifier supplied by the caller. The artifact store is
    /// neither read nor trained into.
    pub fn with_classifier(
        config: &AppConfig,
        deps: ServiceDeps,
        classifier: Arc<dyn FraudClassifier>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let model_store = Arc::new(ModelStore::new(
            deps.artifacts.clone(),
            &config.model.path,
            trainer(config),
        ));
        Self::assemble(config, deps, model_store, Some(classifier), metrics)
    }

    fn assemble(
        config: &AppConfig,
        deps: ServiceDeps,
        model_store: Arc<ModelStore>,
        model: Option<Arc<dyn FraudClassifier>>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let scoring = ScoringService::new(model, config.severity.clone());

        let ttl_secs = i64::try_from(config.cache.ttl_secs).unwrap_or(i64::MAX);
        let ttl = chrono::Duration::seconds(ttl_secs);
        let cache = Arc::new(HistoricalRateCache::new(deps.repo.clone(), deps.clock, ttl));

        let executor = Arc::new(JobExecutor::new(
            deps.repo.clone(),
            cache.clone(),
            deps.slack,
            deps.email,
        ));
        let (dispatcher, worker) =
            SideEffectDispatcher::start(executor, &config.dispatcher, metrics.clone());
        dispatcher.submit(SideEffectJob::RefreshHistoricalRate);

        info!(
            model_ready = scoring.is_ready(),
            training_runs = model_store.training_runs(),
            cache_ttl_secs = config.cache.ttl_secs,
            "Fraud scoring service started"
        );

        Self {
            repo: deps.repo,
            model_store,
            scoring,
            cache,
            dispatcher,
            worker,
            metrics,
            email_subject: config.notifications.email_subject.clone(),
        }
    }

    /// Score a dataset without any side effects.
    pub fn score(&self, dataset: &TabularDataset) -> Result<ScoringResult, ScoringError> {
        self.scoring.score(dataset)
    }

    /// Score a request, queue its side effects and build the caller's report.
    /// Scoring errors become a rejected report; side-effect failures never
    /// reach the caller.
    pub fn analyze(&self, request: ScoringRequest) -> ScoringReport {
        let started = Instant::now();
        let ScoringRequest {
            request_id,
            source_name,
            rows,
        } = request;
        let dataset = Arc::new(TabularDataset::new(rows));

        let result = match self.scoring.score(&dataset) {
            Ok(result) => result,
            Err(e) => {
                self.metrics.record_rejected();
                warn!(
                    request_id = %request_id,
                    source = %source_name,
                    error = %e,
                    "Scoring rejected"
                );
                return ScoringReport::rejected(&request_id, &source_name, e.to_string());
            }
        };
        self.metrics.record_scored(started.elapsed(), &result);

        let historical_rate = self.cache.peek().map(|rate| rate.value);
        let status = status_line(&result, historical_rate);
        let alert = result.alert_message();

        let jobs = plan_jobs(&result, dataset, &source_name, &self.email_subject);
        let jobs_enqueued = self.dispatcher.dispatch(jobs);

        info!(
            request_id = %request_id,
            source = %source_name,
            rows = result.row_count,
            frauds = result.fraud_count,
            severity = result.severity,
            level = %result.severity_level,
            jobs_enqueued,
            "Request scored"
        );

        ScoringReport {
            request_id,
            source_name,
            result: Some(result),
            status,
            alert: Some(alert),
            historical_rate,
            jobs_enqueued,
            timestamp: Utc::now(),
        }
    }

    /// Historical fraud rate, recomputed if the cached value expired. Blocking.
    pub fn historical_rate(&self) -> Option<f64> {
        self.cache.get()
    }

    /// Most recent stored upload, up to `limit` rows. Blocking.
    pub fn latest_transactions(&self, limit: usize) -> Result<TabularDataset, RepositoryError> {
        self.repo.latest_transactions(limit)
    }

    pub fn model_store(&self) -> &ModelStore {
        &self.model_store
    }

    pub fn dispatcher(&self) -> &SideEffectDispatcher {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Wait for queued side effects to finish, then stop the dispatch loop.
    pub async fn shutdown(self, grace: Duration) {
        if !self.dispatcher.wait_idle(grace).await {
            warn!(
                outstanding = self.dispatcher.outstanding(),
                "Side-effect jobs still running at shutdown"
            );
        }
        drop(self.dispatcher);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Dispatch loop ended abnormally");
        }
    }
}

fn trainer(config: &AppConfig) -> ModelTrainer {
    ModelTrainer::new(
        config.model.boosting.clone(),
        Smote::new(config.model.k_neighbors, config.model.seed),
    )
}

/// Summary shown to the caller, e.g.
/// `Detected 2/4 frauds (50.00%). Historical rate: 1.20%.`
pub fn status_line(result: &ScoringResult, historical_rate: Option<f64>) -> String {
    let historical = match historical_rate {
        Some(rate) => format!("Historical rate: {:.2}%.", rate),
        None => "Computing historical rate...".to_string(),
    };
    format!(
        "Detected {}/{} frauds ({:.2}%). {}",
        result.fraud_count, result.row_count, result.fraud_rate, historical
    )
}
