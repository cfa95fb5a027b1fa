//! Fraud model lifecycle: balancing, training, persistence and scoring

pub mod balancer;
pub mod gbdt;
pub mod inference;
pub mod store;
pub mod trainer;

use crate::feature_extractor::FeatureMatrix;

pub use balancer::Smote;
pub use gbdt::{BoostingParams, GradientBoostedClassifier};
pub use inference::ScoringService;
pub use store::{ArtifactStore, FileArtifactStore, ModelState, ModelStore};
pub use trainer::{ModelArtifact, ModelTrainer};

/// A loaded binary classifier producing positive-class probabilities.
pub trait FraudClassifier: Send + Sync {
    /// Probability of fraud for each row, in input order
    fn predict_proba(&self, features: &FeatureMatrix) -> Vec<f64>;

    fn name(&self) -> &str;
}

impl FraudClassifier for GradientBoostedClassifier {
    fn predict_proba(&self, features: &FeatureMatrix) -> Vec<f64> {
        GradientBoostedClassifier::predict_proba(self, features)
    }

    fn name(&self) -> &str {
        if self.is_trained() {
            "gbdt"
        } else {
            "gbdt-default"
        }
    }
}
