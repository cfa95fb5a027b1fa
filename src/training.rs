//! Training data discovery and aggregation across uploaded tables

use crate::repository::TransactionRepository;
use crate::types::dataset::TabularDataset;
use tracing::{debug, info, warn};

/// Tables eligible for training, in upload order. A repository failure is
/// logged and treated as "no sources".
pub fn discover_training_sources(repo: &dyn TransactionRepository) -> Vec<String> {
    match repo.list_training_sources() {
        Ok(tables) => {
            debug!(count = tables.len(), "Discovered training sources");
            tables
        }
        Err(e) => {
            warn!(error = %e, "Training source discovery failed");
            Vec::new()
        }
    }
}

/// Concatenates the labeled rows of every training source.
pub struct TrainingAggregator<'a> {
    repo: &'a dyn TransactionRepository,
}

impl<'a> TrainingAggregator<'a> {
    pub fn new(repo: &'a dyn TransactionRepository) -> Self {
        Self { repo }
    }

    /// Rows from all readable sources, in discovery order then table order.
    /// Unreadable tables are skipped. An empty result means there is nothing
    /// to train on yet.
    pub fn aggregate(&self) -> TabularDataset {
        let sources = discover_training_sources(self.repo);
        let mut combined = TabularDataset::default();
        let mut skipped = 0usize;

        for table in &sources {
            match self.repo.read_source(table) {
                Ok(dataset) => {
                    debug!(table = %table, rows = dataset.len(), "Read training table");
                    combined.extend(dataset);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(table = %table, error = %e, "Skipping unreadable training table");
                }
            }
        }

        info!(
            sources = sources.len(),
            skipped,
            rows = combined.len(),
            "Aggregated training data"
        );
        combined
    }
}
