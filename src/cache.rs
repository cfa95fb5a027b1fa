//! Time-bounded cache of the historical fraud rate

use crate::repository::TransactionRepository;
use crate::training::discover_training_sources;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Percentage of fraud across all labeled historical rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoricalRate {
    pub value: f64,
    pub fetched_at: DateTime<Utc>,
}

/// Single-entry cache. A read within the TTL never touches the repository.
pub struct HistoricalRateCache {
    repo: Arc<dyn TransactionRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entry: RwLock<Option<HistoricalRate>>,
    recomputes: AtomicU64,
}

impl HistoricalRateCache {
    pub fn new(repo: Arc<dyn TransactionRepository>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            repo,
            clock,
            ttl,
            entry: RwLock::new(None),
            recomputes: AtomicU64::new(0),
        }
    }

    /// Current rate, recomputed when the entry is missing or expired. A failed
    /// recompute keeps and returns the previous value.
    pub fn get(&self) -> Option<f64> {
        if let Some(entry) = *self.entry.read() {
            if self.clock.now() - entry.fetched_at < self.ttl {
                return Some(entry.value);
            }
        }
        self.refresh()
    }

    /// Recompute unconditionally.
    pub fn refresh(&self) -> Option<f64> {
        match self.recompute() {
            Some(rate) => {
                *self.entry.write() = Some(rate);
                Some(rate.value)
            }
            None => self.entry.read().map(|entry| entry.value),
        }
    }

    /// Current entry, without any I/O
    pub fn peek(&self) -> Option<HistoricalRate> {
        *self.entry.read()
    }

    /// Number of recomputations attempted
    pub fn recomputes(&self) -> u64 {
        self.recomputes.load(Ordering::Relaxed)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn recompute(&self) -> Option<HistoricalRate> {
        self.recomputes.fetch_add(1, Ordering::Relaxed);

        let tables = discover_training_sources(self.repo.as_ref());
        if tables.is_empty() {
            debug!("No labeled tables for historical rate");
            return None;
        }

        let mut total = 0usize;
        let mut frauds = 0usize;
        for table in &tables {
            match self.repo.read_labels(table) {
                Ok(labels) => {
                    total += labels.len();
                    frauds += labels.iter().filter(|&&label| label == 1).count();
                }
                Err(e) => warn!(table = %table, error = %e, "Skipping table for historical rate"),
            }
        }

        if total == 0 {
            warn!(tables = tables.len(), "Historical rate unavailable, no labels read");
            return None;
        }

        let rate = HistoricalRate {
            value: frauds as f64 / total as f64 * 100.0,
            fetched_at: self.clock.now(),
        };
        info!(rate = rate.value, rows = total, "Historical fraud rate refreshed");
        Some(rate)
    }
}
