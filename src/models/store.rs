//! Model artifact storage and the train-once model lifecycle

use crate::error::ArtifactError;
use crate::models::trainer::{ModelArtifact, ModelTrainer};
use crate::models::FraudClassifier;
use crate::repository::TransactionRepository;
use crate::training::TrainingAggregator;
use parking_lot::RwLock;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

/// Byte storage for model artifacts, keyed by location.
pub trait ArtifactStore: Send + Sync {
    fn exists(&self, location: &str) -> bool;

    fn read(&self, location: &str) -> Result<Vec<u8>, ArtifactError>;

    fn write(&self, location: &str, bytes: &[u8]) -> Result<(), ArtifactError>;
}

/// Artifact store on the local filesystem. Locations are file paths.
#[derive(Debug, Clone, Default)]
pub struct FileArtifactStore;

impl ArtifactStore for FileArtifactStore {
    fn exists(&self, location: &str) -> bool {
        Path::new(location).is_file()
    }

    fn read(&self, location: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = Path::new(location);
        if !path.is_file() {
            return Err(ArtifactError::NotFound(location.to_string()));
        }
        Ok(fs::read(path)?)
    }

    fn write(&self, location: &str, bytes: &[u8]) -> Result<(), ArtifactError> {
        let path = Path::new(location);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Readers never observe a half-written artifact.
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Lifecycle of the model artifact within this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Absent,
    Training,
    Present,
}

/// Owns the classifier handle. Trains at most once, and only when no artifact
/// exists at the configured location.
pub struct ModelStore {
    artifacts: Arc<dyn ArtifactStore>,
    location: String,
    trainer: ModelTrainer,
    state: RwLock<ModelState>,
    handle: OnceLock<Option<Arc<dyn FraudClassifier>>>,
    training_runs: AtomicU64,
}

impl ModelStore {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, location: &str, trainer: ModelTrainer) -> Self {
        Self {
            artifacts,
            location: location.to_string(),
            trainer,
            state: RwLock::new(ModelState::Absent),
            handle: OnceLock::new(),
            training_runs: AtomicU64::new(0),
        }
    }

    /// Make the classifier available, training first if no artifact exists.
    ///
    /// Idempotent: the first call decides the handle and later calls return
    /// the same value. `None` means the artifact exists but could not be loaded.
    pub fn ensure_model(
        &self,
        repo: &dyn TransactionRepository,
    ) -> Option<Arc<dyn FraudClassifier>> {
        self.handle.get_or_init(|| self.initialize(repo)).clone()
    }

    /// Current handle without triggering training
    pub fn handle(&self) -> Option<Arc<dyn FraudClassifier>> {
        self.handle.get().cloned().flatten()
    }

    pub fn state(&self) -> ModelState {
        *self.state.read()
    }

    /// Number of training runs started by this store
    pub fn training_runs(&self) -> u64 {
        self.training_runs.load(Ordering::Relaxed)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn initialize(&self, repo: &dyn TransactionRepository) -> Option<Arc<dyn FraudClassifier>> {
        if self.artifacts.exists(&self.location) {
            *self.state.write() = ModelState::Present;
            return self.load();
        }

        *self.state.write() = ModelState::Training;
        self.training_runs.fetch_add(1, Ordering::Relaxed);
        info!(location = %self.location, "No model artifact found, training");

        let dataset = TrainingAggregator::new(repo).aggregate();
        let artifact = match self.trainer.train(&dataset) {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(reason = %e, "Training fell back to the default classifier");
                ModelArtifact::default_artifact(self.trainer.params().clone())
            }
        };

        if let Err(e) = artifact
            .to_bytes()
            .and_then(|bytes| self.artifacts.write(&self.location, &bytes))
        {
            error!(location = %self.location, error = %e, "Failed to persist model artifact");
        } else {
            info!(
                location = %self.location,
                default = artifact.is_default(),
                training_rows = artifact.training_rows,
                "Model artifact saved"
            );
        }

        *self.state.write() = ModelState::Present;
        Some(Arc::new(artifact.classifier))
    }

    fn load(&self) -> Option<Arc<dyn FraudClassifier>> {
        match self
            .artifacts
            .read(&self.location)
            .and_then(|bytes| ModelArtifact::from_bytes(&bytes))
        {
            Ok(artifact) => {
                info!(
                    location = %self.location,
                    trees = artifact.classifier.tree_count(),
                    default = artifact.is_default(),
                    "Model loaded"
                );
                Some(Arc::new(artifact.classifier))
            }
            Err(e) => {
                error!(location = %self.location, error = %e, "Failed to load model artifact");
                None
            }
        }
    }
}
