//! Type definitions for the fraud scoring service

pub mod dataset;
pub mod scoring;

pub use dataset::{TabularDataset, TransactionRow, LABEL_COLUMN, REQUIRED_FEATURES};
pub use scoring::{
    ScoringReport, ScoringRequest, ScoringResult, SeverityLevel, SeverityThresholds,
    SuspiciousTransaction,
};
