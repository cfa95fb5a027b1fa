//! Relational storage of uploaded transaction tables

pub mod sqlite;

use crate::error::RepositoryError;
use crate::types::dataset::TabularDataset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use sqlite::SqliteRepository;

/// Prefix shared by every stored upload table
pub const TABLE_PREFIX: &str = "transactions_";

/// Catalog entry written for each labeled upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub table_name: String,
    pub source_name: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Storage abstraction over the historical transaction tables.
///
/// Calls are blocking; async callers run them on the blocking pool.
pub trait TransactionRepository: Send + Sync {
    /// Cataloged `transactions_*` tables that carry a label column, in upload order.
    fn list_training_sources(&self) -> Result<Vec<String>, RepositoryError>;

    /// Feature and label columns of a table, restricted to rows labeled 0 or 1.
    fn read_source(&self, table: &str) -> Result<TabularDataset, RepositoryError>;

    /// Label column of a table, restricted to 0 or 1.
    fn read_labels(&self, table: &str) -> Result<Vec<u8>, RepositoryError>;

    /// Create or replace a table with the dataset's rows.
    fn write_source(&self, table: &str, dataset: &TabularDataset) -> Result<(), RepositoryError>;

    /// Append an entry to the upload catalog.
    fn record_upload(&self, record: &UploadRecord) -> Result<(), RepositoryError>;

    /// Up to `limit` rows of the most recently cataloged table.
    fn latest_transactions(&self, limit: usize) -> Result<TabularDataset, RepositoryError>;
}

/// Table name for an upload stored at `at`.
pub fn upload_table_name(at: DateTime<Utc>) -> String {
    format!("{}{}", TABLE_PREFIX, at.format("%Y%m%d_%H%M%S_%6f"))
}

/// Store an uploaded dataset in a fresh table. Only labeled datasets are
/// recorded in the catalog, which keeps unlabeled uploads out of training.
pub fn persist_upload(
    repo: &dyn TransactionRepository,
    dataset: &TabularDataset,
    source_name: &str,
    at: DateTime<Utc>,
) -> Result<String, RepositoryError> {
    let table_name = upload_table_name(at);
    repo.write_source(&table_name, dataset)?;

    if dataset.is_labeled() {
        repo.record_upload(&UploadRecord {
            table_name: table_name.clone(),
            source_name: source_name.to_string(),
            uploaded_at: at,
        })?;
    }

    Ok(table_name)
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_table_name(table: &str) -> Result<(), RepositoryError> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(RepositoryError::InvalidTableName(table.to_string()))
    }
}
