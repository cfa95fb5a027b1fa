//! Fraud Scoring Service - Main Entry Point
//!
//! Consumes scoring requests from NATS, scores them against the fraud model and
//! publishes a report per request. Persistence and alerting run in the
//! background dispatcher.

use anyhow::{Context, Result};
use fraud_scoring_service::{
    cache::SystemClock,
    config::{AppConfig, LoggingConfig},
    consumer::{decode_request, ScoringRequestConsumer},
    metrics::{MetricsReporter, PipelineMetrics},
    models::FileArtifactStore,
    notify::{SlackWebhook, SmtpMailer},
    producer::ReportProducer,
    repository::{SqliteRepository, TransactionRepository},
    service::{FraudService, ServiceDeps},
    types::scoring::ScoringReport,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("fraud_scoring_service={}", logging.level).parse()?);

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Deployment secrets may live in a local .env
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Fraud Scoring Service");
    info!(
        "Severity bands: medium>{:.2}, severe>{:.2}, fraud row p>={:.2}",
        config.severity.medium, config.severity.severe, config.severity.fraud_probability
    );

    let metrics = Arc::new(PipelineMetrics::new());

    let repo: Arc<dyn TransactionRepository> = Arc::new(
        SqliteRepository::open(&config.database.path)
            .context("Failed to open transaction database")?,
    );
    let deps = ServiceDeps {
        repo,
        artifacts: Arc::new(FileArtifactStore),
        slack: Arc::new(SlackWebhook::from_config(&config.notifications)),
        email: Arc::new(SmtpMailer::new(config.notifications.smtp.clone())),
        clock: Arc::new(SystemClock),
    };

    // Model bootstrap may train, which is blocking work
    let service = {
        let config = config.clone();
        let metrics = metrics.clone();
        tokio::task::spawn_blocking(move || FraudService::start(&config, deps, metrics))
            .await
            .context("Service bootstrap failed")?
    };
    let service = Arc::new(service);

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = ScoringRequestConsumer::new(client.clone(), &config.nats.request_subject);
    let producer = Arc::new(ReportProducer::new(client.clone(), &config.nats.report_subject));

    let num_workers = config.pipeline.workers.max(1);
    info!(
        workers = num_workers,
        requests = %consumer.subject(),
        reports = %producer.subject(),
        "Starting request processing loop"
    );

    // Semaphore to limit concurrent requests
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start());

    let mut subscription = consumer.subscribe().await?;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let message = tokio::select! {
            message = subscription.next() => match message {
                Some(message) => message,
                None => break,
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        };

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker semaphore closed")?;

        let service = service.clone();
        let producer = producer.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let report = match decode_request(&message.payload) {
                Ok(request) => {
                    match tokio::task::spawn_blocking(move || service.analyze(request)).await {
                        Ok(report) => report,
                        Err(e) => {
                            error!(error = %e, "Scoring task failed");
                            drop(permit);
                            return;
                        }
                    }
                }
                Err(e) => {
                    metrics.record_rejected();
                    warn!(error = %e, "Failed to deserialize scoring request");
                    ScoringReport::rejected("", "", format!("Malformed request: {}", e))
                }
            };

            if let Err(e) = producer.publish(&report).await {
                error!(request_id = %report.request_id, error = %e, "Failed to publish report");
            }
            if let Some(reply) = message.reply {
                if let Err(e) = producer.publish_to(reply.to_string(), &report).await {
                    error!(request_id = %report.request_id, error = %e, "Failed to send reply");
                }
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            // Log progress every 100 requests
            if count % 100 == 0 {
                let stats = metrics.get_scoring_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.1} req/s", metrics.get_throughput()),
                    avg_latency_us = stats.mean_us,
                    "Processing milestone"
                );
            }

            // Release permit when done
            drop(permit);
        });
    }

    info!("Service shutting down...");
    let _ = semaphore.acquire_many(num_workers as u32).await;

    match Arc::try_unwrap(service) {
        Ok(service) => service.shutdown(Duration::from_secs(10)).await,
        Err(service) => {
            service.dispatcher().wait_idle(Duration::from_secs(10)).await;
        }
    }
    metrics.print_summary();

    Ok(())
}
