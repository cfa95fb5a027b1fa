//! Scoring requests, results and severity classification

use crate::types::dataset::{TabularDataset, TransactionRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity classification of a scored batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeverityLevel {
    Low,
    Medium,
    Severe,
}

impl SeverityLevel {
    /// Determine the level from the batch severity. Comparisons are strict, so a
    /// value sitting exactly on a threshold falls into the lower band.
    pub fn from_severity(severity: f64, thresholds: &SeverityThresholds) -> Self {
        if severity > thresholds.severe {
            SeverityLevel::Severe
        } else if severity > thresholds.medium {
            SeverityLevel::Medium
        } else {
            SeverityLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityLevel::Low => "Low",
            SeverityLevel::Medium => "Medium",
            SeverityLevel::Severe => "Severe",
        }
    }
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability cut-offs used when classifying a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    /// Row probability at or above which a row counts as fraud
    pub fraud_probability: f64,
    /// Severity strictly above this is at least Medium
    pub medium: f64,
    /// Severity strictly above this is Severe
    pub severe: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            fraud_probability: 0.5,
            medium: 0.3,
            severe: 0.7,
        }
    }
}

/// The most suspicious row of a batch, reported when severity is high enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousTransaction {
    /// Position of the row in the scored dataset
    pub index: usize,
    pub probability: f64,
    pub row: TransactionRow,
}

/// Outcome of scoring one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    /// Per-row fraud probability, in input order
    pub probabilities: Vec<f64>,
    pub row_count: usize,
    /// Rows with probability at or above the fraud threshold
    pub fraud_count: usize,
    /// `fraud_count / row_count * 100`
    pub fraud_rate: f64,
    /// Maximum row probability
    pub severity: f64,
    pub severity_level: SeverityLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspicious: Option<SuspiciousTransaction>,
}

impl ScoringResult {
    /// Human readable alert line, e.g. `Severity: 0.95 (Severe)`
    pub fn alert_message(&self) -> String {
        format!("Severity: {:.2} ({})", self.severity, self.severity_level)
    }
}

/// Incoming scoring request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringRequest {
    #[serde(default = "new_request_id")]
    pub request_id: String,
    /// Name of the upload the rows came from
    #[serde(default)]
    pub source_name: String,
    pub rows: Vec<TransactionRow>,
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ScoringRequest {
    pub fn new(source_name: &str, dataset: TabularDataset) -> Self {
        Self {
            request_id: new_request_id(),
            source_name: source_name.to_string(),
            rows: dataset.rows,
        }
    }
}

/// Response returned to the caller of a scoring request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringReport {
    pub request_id: String,
    pub source_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ScoringResult>,
    /// Summary line including the historical baseline when known
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_rate: Option<f64>,
    /// Side-effect jobs accepted by the dispatcher
    pub jobs_enqueued: usize,
    pub timestamp: DateTime<Utc>,
}

impl ScoringReport {
    /// Report for a request that could not be scored
    pub fn rejected(request_id: &str, source_name: &str, status: String) -> Self {
        Self {
            request_id: request_id.to_string(),
            source_name: source_name.to_string(),
            result: None,
            status,
            alert: None,
            historical_rate: None,
            jobs_enqueued: 0,
            timestamp: Utc::now(),
        }
    }
}
