//! Error types surfaced at module boundaries

/// Failures of the synchronous scoring path. These are the only errors that
/// reach the caller of a scoring request.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScoringError {
    #[error("Fraud detection model is unavailable.")]
    ModelUnavailable,
    #[error("Missing required features: {}.", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("Dataset contains no rows.")]
    EmptyDataset,
}

/// Relational store failures
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("invalid table name: {0}")]
    InvalidTableName(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Minority-class oversampling could not proceed
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BalanceError {
    #[error("no samples to balance")]
    Empty,
    #[error("feature matrix has {rows} rows but {labels} labels")]
    LengthMismatch { rows: usize, labels: usize },
    #[error("rows have inconsistent feature counts")]
    RaggedMatrix,
    #[error("only one class present in labels")]
    SingleClass,
    #[error("minority class has {samples} samples, need more than {k_neighbors} neighbors")]
    TooFewMinoritySamples { samples: usize, k_neighbors: usize },
}

/// Reasons a training run falls back to the default classifier
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TrainingError {
    #[error("no labeled training data")]
    NoTrainingData,
    #[error("training rows carry labels outside 0/1")]
    InvalidLabels,
    #[error("training data could not be encoded: {0}")]
    Encoding(#[from] ScoringError),
    #[error("class balancing failed: {0}")]
    Balancing(#[from] BalanceError),
}

/// Model artifact persistence failures
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact not found at {0}")]
    NotFound(String),
    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Notification transport failures
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("webhook request failed: {0}")]
    Webhook(String),
    #[error("invalid email address: {0}")]
    Address(String),
    #[error("email delivery failed: {0}")]
    Email(String),
}

/// Background job failures. Logged and counted, never surfaced to a request.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
    #[error("notification failed: {0}")]
    Notification(#[from] NotificationError),
    #[error("historical rate unavailable")]
    RateUnavailable,
}
