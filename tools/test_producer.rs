//! Test Request Producer
//!
//! Generates BankSim-style transaction batches and publishes them to NATS as
//! scoring requests.
//!
//! Usage:
//!   test_producer [nats_url] [subject] [batches] [rows_per_batch] [fraud_rate] [delay_ms]
//!                 [labeled]

use fraud_scoring_service::types::{ScoringRequest, TransactionRow};
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

const AGE_BUCKETS: [&str; 7] = ["0", "1", "2", "3", "4", "5", "6"];
const EVERYDAY_CATEGORIES: [&str; 4] = [
    "es_transportation",
    "es_food",
    "es_health",
    "es_contents",
];
const RISKY_CATEGORIES: [&str; 3] = ["es_travel", "es_leisure", "es_sportsandtoys"];

/// Transaction generator for testing
struct RowGenerator {
    rng: rand::rngs::ThreadRng,
    step: i64,
    labeled: bool,
}

impl RowGenerator {
    fn new(labeled: bool) -> Self {
        Self {
            rng: rand::thread_rng(),
            step: 0,
            labeled,
        }
    }

    /// Generate an everyday purchase
    fn generate_legitimate(&mut self) -> TransactionRow {
        self.step += 1;
        let row = TransactionRow::new(
            self.step,
            &format!("C{}", self.rng.gen_range(1_000_000..2_000_000)),
            self.random_choice(&AGE_BUCKETS),
            self.random_choice(&["F", "M"]),
            "28007",
            &format!("M{}", self.rng.gen_range(100_000..100_050)),
            "28007",
            self.random_choice(&EVERYDAY_CATEGORIES),
            (self.rng.gen_range(1.0..120.0_f64) * 100.0).round() / 100.0,
        );
        self.label(row, 0)
    }

    /// Generate a large purchase in a category fraud favours
    fn generate_suspicious(&mut self) -> TransactionRow {
        self.step += 1;
        let row = TransactionRow::new(
            self.step,
            &format!("C{}", self.rng.gen_range(1_000_000..2_000_000)),
            self.random_choice(&AGE_BUCKETS),
            self.random_choice(&["F", "M", "U"]),
            "28007",
            &format!("M{}", self.rng.gen_range(900_000..900_010)),
            "28007",
            self.random_choice(&RISKY_CATEGORIES),
            (self.rng.gen_range(500.0..8000.0_f64) * 100.0).round() / 100.0, // High amount
        );
        self.label(row, 1)
    }

    fn label(&self, row: TransactionRow, fraud: i64) -> TransactionRow {
        if self.labeled {
            row.with_fraud(fraud)
        } else {
            row
        }
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }

    /// Build a batch; returns the request and the number of suspicious rows
    fn generate_batch(
        &mut self,
        index: u64,
        rows: usize,
        fraud_rate: f64,
    ) -> (ScoringRequest, usize) {
        let mut suspicious = 0;
        let rows = (0..rows)
            .map(|_| {
                if self.rng.gen_bool(fraud_rate) {
                    suspicious += 1;
                    self.generate_suspicious()
                } else {
                    self.generate_legitimate()
                }
            })
            .collect();

        let request = ScoringRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            source_name: format!("batch_{:06}.csv", index),
            rows,
        };
        (request, suspicious)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Request Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("fraud.score.requests");
    let batches: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(20);
    let rows_per_batch: usize = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(50);
    let fraud_rate: f64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(0.1);
    let delay_ms: u64 = args.get(6).and_then(|s| s.parse().ok()).unwrap_or(500);
    let labeled = args.get(7).is_some_and(|s| s == "labeled");

    info!(
        nats_url = %nats_url,
        subject = %subject,
        batches = batches,
        rows_per_batch = rows_per_batch,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        labeled = labeled,
        "Configuration loaded"
    );

    // Connect to NATS
    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(batches, rows_per_batch, fraud_rate, labeled).await;
        }
    };

    let mut generator = RowGenerator::new(labeled);
    let mut total_rows = 0usize;
    let mut total_suspicious = 0usize;

    info!("Starting to publish {} batches...", batches);

    for i in 0..batches {
        let (request, suspicious) = generator.generate_batch(i, rows_per_batch, fraud_rate);
        total_rows += request.rows.len();
        total_suspicious += suspicious;

        let payload = serde_json::to_vec(&request)?;
        client.publish(subject.to_string(), payload.into()).await?;

        info!(
            request_id = %request.request_id,
            source = %request.source_name,
            suspicious = suspicious,
            "Published batch {}/{}",
            i + 1,
            batches
        );

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    client.flush().await?;

    info!(
        "Completed! Published {} batches ({} rows, {} suspicious)",
        batches, total_rows, total_suspicious
    );

    Ok(())
}

async fn run_dry_mode(
    batches: u64,
    rows_per_batch: usize,
    fraud_rate: f64,
    labeled: bool,
) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = RowGenerator::new(labeled);

    for i in 0..batches {
        let (request, suspicious) = generator.generate_batch(i, rows_per_batch, fraud_rate);
        if i == 0 {
            let json = serde_json::to_string_pretty(&request)?;
            info!("Sample batch:\n{}", json);
        } else {
            info!(
                source = %request.source_name,
                rows = request.rows.len(),
                suspicious = suspicious,
                "Generated batch"
            );
        }
    }

    Ok(())
}
