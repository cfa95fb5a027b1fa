//! In-memory doubles shared by unit tests

use crate::cache::Clock;
use crate::error::{ArtifactError, NotificationError, RepositoryError};
use crate::feature_extractor::FeatureMatrix;
use crate::models::store::ArtifactStore;
use crate::models::FraudClassifier;
use crate::notify::{EmailNotifier, NotifyOutcome, SlackNotifier};
use crate::repository::{validate_table_name, TransactionRepository, UploadRecord, TABLE_PREFIX};
use crate::types::dataset::{TabularDataset, TransactionRow};
use crate::types::scoring::SeverityLevel;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

const CATEGORIES: [&str; 4] = ["es_transportation", "es_food", "es_health", "es_travel"];

/// Fully populated, unlabeled row whose values vary with `step`.
pub fn scoring_row(step: i64) -> TransactionRow {
    let category = CATEGORIES[step.unsigned_abs() as usize % CATEGORIES.len()];
    TransactionRow::new(
        step,
        &format!("C{}", step % 7),
        &(step % 6).to_string(),
        if step % 2 == 0 { "F" } else { "M" },
        "28007",
        &format!("M{}", step % 5),
        "28007",
        category,
        10.0 + step as f64,
    )
}

pub fn unlabeled_row(step: i64) -> TransactionRow {
    scoring_row(step)
}

pub fn labeled_row(step: i64, fraud: i64) -> TransactionRow {
    scoring_row(step).with_fraud(fraud)
}

/// Legitimate rows followed by fraud rows. Fraud rows are large travel
/// purchases, legitimate rows small transport fares.
pub fn training_rows(legitimate: usize, fraudulent: usize) -> Vec<TransactionRow> {
    let legit = (0..legitimate).map(|i| {
        let i = i as i64;
        TransactionRow::new(
            i, &format!("C{}", i % 9), &(i % 5).to_string(), "F", "28007",
            &format!("M{}", i % 4), "28007", "es_transportation", 5.0 + (i % 20) as f64,
        )
        .with_fraud(0)
    });
    let fraud = (0..fraudulent).map(|i| {
        let i = i as i64;
        TransactionRow::new(
            100 + i, &format!("F{}", i % 3), &(i % 5).to_string(), "M", "28007",
            "M99", "28007", "es_travel", 2_000.0 + 37.0 * i as f64,
        )
        .with_fraud(1)
    });
    legit.chain(fraud).collect()
}

/// Repository held in memory, with failure injection and read counters.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Vec<(String, TabularDataset)>>,
    catalog: Mutex<Vec<UploadRecord>>,
    failing_reads: Mutex<HashSet<String>>,
    fail_discovery: AtomicBool,
    list_calls: AtomicUsize,
    label_reads: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a table and catalog it as an upload
    pub fn insert_source(&self, table: &str, rows: Vec<TransactionRow>) {
        let dataset = TabularDataset::new(rows);
        self.put_table(table, dataset);
        self.catalog.lock().push(UploadRecord {
            table_name: table.to_string(),
            source_name: format!("{}.csv", table),
            uploaded_at: Utc::now(),
        });
    }

    pub fn fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads_of(&self, table: &str) {
        self.failing_reads.lock().insert(table.to_string());
    }

    pub fn table(&self, table: &str) -> Option<TabularDataset> {
        self.tables
            .lock()
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, dataset)| dataset.clone())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.catalog.lock().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn label_reads(&self) -> usize {
        self.label_reads.load(Ordering::SeqCst)
    }

    fn put_table(&self, table: &str, dataset: TabularDataset) {
        let mut tables = self.tables.lock();
        match tables.iter_mut().find(|(name, _)| name == table) {
            Some(entry) => entry.1 = dataset,
            None => tables.push((table.to_string(), dataset)),
        }
    }

    fn readable(&self, table: &str) -> Result<TabularDataset, RepositoryError> {
        if self.failing_reads.lock().contains(table) {
            return Err(RepositoryError::Unavailable(format!("read of {} failed", table)));
        }
        self.table(table)
            .ok_or_else(|| RepositoryError::Unavailable(format!("no such table: {}", table)))
    }
}

fn binary_rows(dataset: TabularDataset) -> TabularDataset {
    dataset
        .rows
        .into_iter()
        .filter(|row| matches!(row.fraud, Some(0) | Some(1)))
        .collect::<Vec<_>>()
        .into()
}

impl TransactionRepository for InMemoryRepository {
    fn list_training_sources(&self) -> Result<Vec<String>, RepositoryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("catalog offline".to_string()));
        }
        let catalog = self.catalog.lock().clone();
        let mut sources: Vec<String> = Vec::new();
        for record in catalog {
            let labeled = self
                .table(&record.table_name)
                .is_some_and(|dataset| dataset.is_labeled());
            if record.table_name.starts_with(TABLE_PREFIX)
                && labeled
                && !sources.contains(&record.table_name)
            {
                sources.push(record.table_name);
            }
        }
        Ok(sources)
    }

    fn read_source(&self, table: &str) -> Result<TabularDataset, RepositoryError> {
        validate_table_name(table)?;
        Ok(binary_rows(self.readable(table)?))
    }

    fn read_labels(&self, table: &str) -> Result<Vec<u8>, RepositoryError> {
        validate_table_name(table)?;
        self.label_reads.fetch_add(1, Ordering::SeqCst);
        let dataset = binary_rows(self.readable(table)?);
        Ok(dataset.labels().unwrap_or_default())
    }

    fn write_source(&self, table: &str, dataset: &TabularDataset) -> Result<(), RepositoryError> {
        validate_table_name(table)?;
        self.put_table(table, dataset.clone());
        Ok(())
    }

    fn record_upload(&self, record: &UploadRecord) -> Result<(), RepositoryError> {
        self.catalog.lock().push(record.clone());
        Ok(())
    }

    fn latest_transactions(&self, limit: usize) -> Result<TabularDataset, RepositoryError> {
        let latest = self.catalog.lock().last().map(|r| r.table_name.clone());
        let Some(table) = latest else {
            return Ok(TabularDataset::default());
        };
        let mut dataset = self.readable(&table)?;
        dataset.rows.truncate(limit);
        Ok(dataset)
    }
}

/// Artifact store backed by a map
#[derive(Default)]
pub struct InMemoryArtifactStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicUsize,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an artifact without counting a write
    pub fn put(&self, location: &str, bytes: Vec<u8>) {
        self.blobs.lock().insert(location.to_string(), bytes);
    }

    pub fn get(&self, location: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(location).cloned()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn exists(&self, location: &str) -> bool {
        self.blobs.lock().contains_key(location)
    }

    fn read(&self, location: &str) -> Result<Vec<u8>, ArtifactError> {
        self.get(location)
            .ok_or_else(|| ArtifactError::NotFound(location.to_string()))
    }

    fn write(&self, location: &str, bytes: &[u8]) -> Result<(), ArtifactError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.put(location, bytes.to_vec());
        Ok(())
    }
}

/// Slack double recording each alert
#[derive(Default)]
pub struct RecordingSlack {
    calls: Mutex<Vec<(SeverityLevel, String)>>,
    fail: AtomicBool,
    delay: Mutex<Option<StdDuration>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingSlack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Block each call for `delay` before recording it
    pub fn delay(&self, delay: StdDuration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<(SeverityLevel, String)> {
        self.calls.lock().clone()
    }

    /// Most calls ever running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl SlackNotifier for RecordingSlack {
    fn notify(
        &self,
        level: SeverityLevel,
        message: &str,
    ) -> Result<NotifyOutcome, NotificationError> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Webhook("503 Service Unavailable".to_string()));
        }
        self.calls.lock().push((level, message.to_string()));
        Ok(NotifyOutcome::Delivered)
    }
}

/// Email double recording `(subject, body)` pairs
#[derive(Default)]
pub struct RecordingEmail {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingEmail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

impl EmailNotifier for RecordingEmail {
    fn send(&self, subject: &str, body: &str) -> Result<NotifyOutcome, NotificationError> {
        self.calls.lock().push((subject.to_string(), body.to_string()));
        Ok(NotifyOutcome::Delivered)
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Classifier returning preset probabilities by row position; rows beyond
/// the preset list score 0.
pub struct FixedClassifier {
    probabilities: Vec<f64>,
}

impl FixedClassifier {
    pub fn new(probabilities: Vec<f64>) -> Self {
        Self { probabilities }
    }
}

impl FraudClassifier for FixedClassifier {
    fn predict_proba(&self, features: &FeatureMatrix) -> Vec<f64> {
        (0..features.len())
            .map(|i| self.probabilities.get(i).copied().unwrap_or(0.0))
            .collect()
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
