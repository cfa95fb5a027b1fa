//! Feature extraction for model training and inference.
//!
//! Projects a dataset onto the nine required feature columns and label-encodes
//! the categorical ones. Codes are assigned from the sorted distinct values
//! present in the dataset being encoded, so the same category can map to
//! different codes in two different datasets. Training and scoring both encode
//! independently; nothing about the training-time vocabulary is persisted.

use crate::error::ScoringError;
use crate::types::dataset::{TabularDataset, REQUIRED_FEATURES};
use std::collections::{BTreeSet, HashMap};

/// Row-major feature matrix, one inner vector per dataset row.
pub type FeatureMatrix = Vec<Vec<f64>>;

/// Maps category strings to dense integer codes.
#[derive(Debug, Clone, Default)]
pub struct LabelEncoder {
    codes: HashMap<String, usize>,
}

impl LabelEncoder {
    /// Fit on the given values. Codes follow lexicographic order of the
    /// distinct values, starting at zero.
    pub fn fit<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = values.into_iter().collect();
        let codes = distinct
            .into_iter()
            .enumerate()
            .map(|(code, value)| (value.to_string(), code))
            .collect();
        Self { codes }
    }

    pub fn transform(&self, value: &str) -> Option<usize> {
        self.codes.get(value).copied()
    }

    /// Number of distinct categories seen during fit
    pub fn classes(&self) -> usize {
        self.codes.len()
    }
}

/// Transforms datasets into model input features.
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the feature matrix, failing with `MissingColumns` when any
    /// required column is absent.
    pub fn extract(&self, dataset: &TabularDataset) -> Result<FeatureMatrix, ScoringError> {
        let missing = dataset.missing_features();
        if !missing.is_empty() {
            return Err(ScoringError::MissingColumns(missing));
        }

        let encoders: HashMap<&str, LabelEncoder> = REQUIRED_FEATURES
            .iter()
            .filter(|column| is_categorical(column))
            .map(|&column| {
                let encoder = LabelEncoder::fit(
                    dataset.rows.iter().filter_map(|row| row.categorical(column)),
                );
                (column, encoder)
            })
            .collect();

        let matrix = dataset
            .rows
            .iter()
            .map(|row| {
                REQUIRED_FEATURES
                    .iter()
                    .map(|&column| match column {
                        "step" => row.step.unwrap_or_default() as f64,
                        "amount" => row.amount.unwrap_or_default(),
                        _ => row
                            .categorical(column)
                            .and_then(|value| encoders.get(column)?.transform(value))
                            .unwrap_or_default() as f64,
                    })
                    .collect()
            })
            .collect();

        Ok(matrix)
    }

    pub fn feature_count(&self) -> usize {
        REQUIRED_FEATURES.len()
    }

    pub fn feature_names(&self) -> Vec<&'static str> {
        REQUIRED_FEATURES.to_vec()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_categorical(column: &str) -> bool {
    !matches!(column, "step" | "amount")
}
