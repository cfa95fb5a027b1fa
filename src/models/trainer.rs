//! Model training and the persisted artifact format

use crate::error::{ArtifactError, TrainingError};
use crate::feature_extractor::FeatureExtractor;
use crate::models::balancer::Smote;
use crate::models::gbdt::{BoostingParams, GradientBoostedClassifier};
use crate::types::dataset::TabularDataset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Persisted model: the classifier plus training bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub classifier: GradientBoostedClassifier,
    /// `None` for the default artifact
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
    /// Rows after balancing
    #[serde(default)]
    pub training_rows: usize,
    pub scale_pos_weight: f64,
}

impl ModelArtifact {
    /// Untrained classifier written when there is nothing usable to train on.
    /// It loads like any other artifact and scores every row at the base score.
    pub fn default_artifact(params: BoostingParams) -> Self {
        Self {
            classifier: GradientBoostedClassifier::untrained(params),
            trained_at: None,
            training_rows: 0,
            scale_pos_weight: 1.0,
        }
    }

    pub fn is_default(&self) -> bool {
        !self.classifier.is_trained()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ArtifactError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArtifactError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Weight applied to positive rows: negatives over positives, or 1 when there
/// are no positives.
pub fn scale_pos_weight(labels: &[u8]) -> f64 {
    let positives = labels.iter().filter(|&&label| label == 1).count();
    let negatives = labels.len() - positives;
    if positives > 0 {
        negatives as f64 / positives as f64
    } else {
        1.0
    }
}

/// Runs encode, balance and fit over an aggregated training dataset.
pub struct ModelTrainer {
    params: BoostingParams,
    balancer: Smote,
    extractor: FeatureExtractor,
}

impl ModelTrainer {
    pub fn new(params: BoostingParams, balancer: Smote) -> Self {
        Self {
            params,
            balancer,
            extractor: FeatureExtractor::new(),
        }
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    /// Train a classifier. Errors describe why the caller should fall back to
    /// the default artifact.
    pub fn train(&self, dataset: &TabularDataset) -> Result<ModelArtifact, TrainingError> {
        if dataset.is_empty() {
            return Err(TrainingError::NoTrainingData);
        }
        let labels = dataset.labels().ok_or(TrainingError::InvalidLabels)?;
        let features = self.extractor.extract(dataset)?;
        let (x, y) = self.balancer.fit_resample(&features, &labels)?;

        let weight = scale_pos_weight(&y);
        let started = Instant::now();
        let classifier = GradientBoostedClassifier::fit(self.params.clone(), &x, &y, weight);

        info!(
            source_rows = dataset.len(),
            training_rows = x.len(),
            trees = classifier.tree_count(),
            scale_pos_weight = weight,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model trained"
        );

        Ok(ModelArtifact {
            classifier,
            trained_at: Some(Utc::now()),
            training_rows: x.len(),
            scale_pos_weight: weight,
        })
    }
}

impl Default for ModelTrainer {
    fn default() -> Self {
        Self::new(BoostingParams::default(), Smote::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BalanceError;
    use crate::testing::training_rows;

    fn fast_params() -> BoostingParams {
        BoostingParams {
            n_estimators: 10,
            ..BoostingParams::default()
        }
    }

    #[test]
    fn test_scale_pos_weight() {
        assert_eq!(scale_pos_weight(&[0, 0, 0, 1]), 3.0);
        assert_eq!(scale_pos_weight(&[0, 1, 0, 1]), 1.0);
        assert_eq!(scale_pos_weight(&[0, 0, 0]), 1.0);
        assert_eq!(scale_pos_weight(&[]), 1.0);
    }

    #[test]
    fn test_train_on_imbalanced_data() {
        let dataset = TabularDataset::new(training_rows(40, 10));
        let trainer = ModelTrainer::new(fast_params(), Smote::default());

        let artifact = trainer.train(&dataset).unwrap();

        assert!(!artifact.is_default());
        assert!(artifact.trained_at.is_some());
        // balanced to 40 + 40 before fitting
        assert_eq!(artifact.training_rows, 80);
        assert_eq!(artifact.scale_pos_weight, 1.0);
        assert_eq!(artifact.classifier.tree_count(), 10);
    }

    #[test]
    fn test_train_empty_dataset() {
        let trainer = ModelTrainer::default();
        assert_eq!(
            trainer.train(&TabularDataset::default()).unwrap_err(),
            TrainingError::NoTrainingData
        );
    }

    #[test]
    fn test_train_single_class_fails_balancing() {
        let dataset = TabularDataset::new(training_rows(20, 0));
        let err = ModelTrainer::new(fast_params(), Smote::default())
            .train(&dataset)
            .unwrap_err();
        assert_eq!(err, TrainingError::Balancing(BalanceError::SingleClass));
    }

    #[test]
    fn test_default_artifact_round_trip() {
        let artifact = ModelArtifact::default_artifact(BoostingParams::default());
        assert!(artifact.is_default());

        let restored = ModelArtifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, artifact);
    }

    // Thresholds and leaf weights must survive JSON exactly, or a reloaded
    // model can route a row down a different branch.
    #[test]
    fn test_trained_artifact_round_trip_is_exact() {
        let dataset = TabularDataset::new(training_rows(300, 40));
        let params = BoostingParams {
            n_estimators: 20,
            ..BoostingParams::default()
        };
        let artifact = ModelTrainer::new(params, Smote::default())
            .train(&dataset)
            .unwrap();

        let restored = ModelArtifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap();

        assert_eq!(restored, artifact);
        let features = FeatureExtractor::new().extract(&dataset).unwrap();
        let before = artifact.classifier.predict_proba(&features);
        let after = restored.classifier.predict_proba(&features);
        assert!(before
            .iter()
            .zip(&after)
            .all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn test_corrupt_artifact_rejected() {
        assert!(matches!(
            ModelArtifact::from_bytes(b"not json"),
            Err(ArtifactError::Decode(_))
        ));
    }
}
