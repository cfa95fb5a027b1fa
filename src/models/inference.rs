//! Batch scoring against the loaded fraud classifier

use crate::error::ScoringError;
use crate::feature_extractor::FeatureExtractor;
use crate::models::FraudClassifier;
use crate::types::dataset::TabularDataset;
use crate::types::scoring::{
    ScoringResult, SeverityLevel, SeverityThresholds, SuspiciousTransaction,
};
use std::sync::Arc;
use tracing::debug;

/// Scores datasets. Pure with respect to the outside world: no persistence,
/// notification or cache access happens here.
pub struct ScoringService {
    model: Option<Arc<dyn FraudClassifier>>,
    extractor: FeatureExtractor,
    thresholds: SeverityThresholds,
}

impl ScoringService {
    pub fn new(model: Option<Arc<dyn FraudClassifier>>, thresholds: SeverityThresholds) -> Self {
        Self {
            model,
            extractor: FeatureExtractor::new(),
            thresholds,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    pub fn thresholds(&self) -> &SeverityThresholds {
        &self.thresholds
    }

    /// Score every row of the dataset and summarize the batch.
    pub fn score(&self, dataset: &TabularDataset) -> Result<ScoringResult, ScoringError> {
        let model = self.model.as_ref().ok_or(ScoringError::ModelUnavailable)?;

        let missing = dataset.missing_features();
        if !missing.is_empty() {
            return Err(ScoringError::MissingColumns(missing));
        }
        if dataset.is_empty() {
            return Err(ScoringError::EmptyDataset);
        }

        let features = self.extractor.extract(dataset)?;
        let probabilities = model.predict_proba(&features);
        let result = summarize(probabilities, dataset, &self.thresholds);

        debug!(
            model = model.name(),
            rows = result.row_count,
            frauds = result.fraud_count,
            severity = result.severity,
            level = %result.severity_level,
            "Scored dataset"
        );

        Ok(result)
    }
}

/// Build a batch summary from per-row probabilities.
pub fn summarize(
    probabilities: Vec<f64>,
    dataset: &TabularDataset,
    thresholds: &SeverityThresholds,
) -> ScoringResult {
    let row_count = probabilities.len();
    let fraud_count = probabilities
        .iter()
        .filter(|&&p| p >= thresholds.fraud_probability)
        .count();
    let fraud_rate = if row_count > 0 {
        fraud_count as f64 / row_count as f64 * 100.0
    } else {
        0.0
    };

    // first row attaining the maximum
    let mut peak: Option<(usize, f64)> = None;
    for (index, &p) in probabilities.iter().enumerate() {
        if peak.map_or(true, |(_, best)| p > best) {
            peak = Some((index, p));
        }
    }
    let severity = peak.map_or(0.0, |(_, p)| p);
    let severity_level = SeverityLevel::from_severity(severity, thresholds);

    let suspicious = peak
        .filter(|&(_, p)| p >= thresholds.fraud_probability)
        .and_then(|(index, probability)| {
            dataset.rows.get(index).map(|row| SuspiciousTransaction {
                index,
                probability,
                row: row.clone(),
            })
        });

    ScoringResult {
        probabilities,
        row_count,
        fraud_count,
        fraud_rate,
        severity,
        severity_level,
        suspicious,
    }
}
