//! Fraud Scoring Service Library
//!
//! Scores uploaded transaction batches with a gradient-boosted classifier that
//! is trained once from the stored history, reports batch severity against a
//! cached historical fraud rate, and hands persistence and alerting to a
//! bounded background queue.

pub mod cache;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod producer;
pub mod repository;
pub mod service;
pub mod training;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::AppConfig;
pub use consumer::ScoringRequestConsumer;
pub use feature_extractor::FeatureExtractor;
pub use models::inference::ScoringService;
pub use producer::ReportProducer;
pub use service::{FraudService, ServiceDeps};
pub use types::{dataset::TabularDataset, scoring::ScoringReport, scoring::ScoringRequest};
